//! Message and page templates.

use ulid::Ulid;

use crate::clock::to_rfc3339;
use crate::model::{Booking, TeachingSlot};
use crate::notify::Notification;
use crate::token::Action;

/// Minimal HTML escaping for user-supplied text.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Builds the absolute approve/reject URLs embedded in owner emails.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    base: String,
}

impl LinkBuilder {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Ulids and hex tokens are URL-safe, so no percent-encoding is needed.
    pub fn action_url(&self, action: Action, booking_id: Ulid, token: &str) -> String {
        format!(
            "{}/bookings/{}?bookingId={booking_id}&token={token}",
            self.base,
            action.as_str()
        )
    }
}

const WRAPPER_STYLE: &str = "font-family:ui-sans-serif,system-ui,Arial;line-height:1.6;";
const BUTTON_STYLE: &str =
    "display:inline-block;padding:10px 14px;color:#fff;text-decoration:none;border-radius:8px;";

pub fn booking_requested(
    owner_email: &str,
    booking: &Booking,
    slot: &TeachingSlot,
    approve_url: &str,
    reject_url: &str,
) -> Notification {
    let slot_text = slot.time_text();
    let note = booking
        .note
        .as_deref()
        .map(|n| format!("<p><b>Note:</b> {}</p>", escape(n)))
        .unwrap_or_default();
    let html = format!(
        r#"<div style="{WRAPPER_STYLE}">
  <h2>New booking request</h2>
  <p><b>Student:</b> {name} ({email})</p>
  <p><b>Phone:</b> {phone}</p>
  <p><b>Subject:</b> {subject}</p>
  <p><b>Slot:</b> {slot_text}</p>
  {note}
  <p>
    <a href="{approve_url}" style="{BUTTON_STYLE}background:#2563eb;margin-right:8px;">Approve</a>
    <a href="{reject_url}" style="{BUTTON_STYLE}background:#ef4444;">Reject</a>
  </p>
  <p style="color:#6b7280;">These links stop working at {deadline}.</p>
</div>"#,
        name = escape(&booking.contact.name),
        email = escape(&booking.contact.email),
        phone = escape(&booking.contact.phone),
        subject = escape(&booking.subject),
        deadline = to_rfc3339(booking.expires_at),
    );
    Notification {
        to: owner_email.to_string(),
        subject: format!("Booking request: {} ({slot_text})", booking.subject),
        html,
    }
}

pub fn booking_approved(booking: &Booking, slot: &TeachingSlot) -> Notification {
    Notification {
        to: booking.contact.email.clone(),
        subject: format!("Booking approved: {}", booking.subject),
        html: format!(
            r#"<div style="{WRAPPER_STYLE}">
  <h2>Booking approved</h2>
  <p>Your request for <b>{slot}</b> was approved by the tutor.</p>
</div>"#,
            slot = slot.time_text()
        ),
    }
}

pub fn booking_rejected(booking: &Booking) -> Notification {
    Notification {
        to: booking.contact.email.clone(),
        subject: format!("Booking rejected: {}", booking.subject),
        html: format!(
            r#"<div style="{WRAPPER_STYLE}">
  <h2>Booking rejected</h2>
  <p>Your request for <b>{subject}</b> was declined by the tutor.</p>
</div>"#,
            subject = escape(&booking.subject)
        ),
    }
}

pub fn slot_cancelled(booking: &Booking, slot: &TeachingSlot) -> Notification {
    let slot_text = slot.time_text();
    Notification {
        to: booking.contact.email.clone(),
        subject: format!("Session changed ({slot_text})"),
        html: format!(
            r#"<div style="{WRAPPER_STYLE}">
  <p>Hello <b>{name}</b>,</p>
  <p>The session on <b>{slot_text}</b> was changed by the tutor and is no longer scheduled.</p>
  <p>Please contact your tutor to arrange a new time.</p>
</div>"#,
            name = escape(&booking.contact.name)
        ),
    }
}

/// Standalone page shown after a link click.
pub fn html_page(title: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8" />
<meta name="viewport" content="width=device-width,initial-scale=1" />
<title>{title}</title>
</head>
<body style="font-family:ui-sans-serif,system-ui,Arial; padding:24px;">
<h2>{title}</h2>
<div>{body}</div>
</body>
</html>"#,
        title = escape(title),
        body = escape(body)
    )
}
