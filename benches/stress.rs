use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use ulid::Ulid;

use tutorslot::clock::ManualClock;
use tutorslot::directory::{Room, StaticDirectory, UserRecord};
use tutorslot::engine::{Engine, EngineContext, StudentInfo};
use tutorslot::model::DayOfWeek;
use tutorslot::notify::{Notification, Outbox};
use tutorslot::sweeper;

const T0: i64 = 1_767_225_600_000;
const DAY: i64 = 86_400_000;
const STUDENTS: usize = 64;
const ROOMS: usize = 10;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn tutor(room: usize) -> String {
    format!("tutor-{room}")
}

fn room(room: usize) -> String {
    format!("room-{room}")
}

fn student(n: usize) -> String {
    format!("student-{n}")
}

fn info(n: usize) -> StudentInfo {
    StudentInfo {
        name: format!("Student {n}"),
        phone: "0900 000 000".into(),
        subject: "Benchmarks".into(),
        note: None,
    }
}

/// The approve token for `booking_id` out of the owner's request mail.
fn approve_token(mail: &mut mpsc::Receiver<Notification>, booking_id: Ulid) -> String {
    let marker = format!("/bookings/approve?bookingId={booking_id}&token=");
    while let Ok(m) = mail.try_recv() {
        if let Some(start) = m.html.find(&marker) {
            return m.html[start + marker.len()..]
                .chars()
                .take_while(char::is_ascii_hexdigit)
                .collect();
        }
    }
    panic!("no request mail for booking {booking_id}");
}

struct Setup {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    mail: mpsc::Receiver<Notification>,
}

fn setup() -> Setup {
    let dir = StaticDirectory::new();
    for r in 0..ROOMS {
        dir.insert_user(UserRecord {
            id: tutor(r),
            email: Some(format!("tutor{r}@example.com")),
        });
        dir.insert_room(Room {
            id: room(r),
            owner_id: tutor(r),
            name: format!("Room {r}"),
            owner_email: None,
        });
    }
    for s in 0..STUDENTS {
        dir.insert_user(UserRecord {
            id: student(s),
            email: Some(format!("student{s}@example.com")),
        });
    }

    let data = std::env::temp_dir().join(format!("tutorslot_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&data).unwrap();

    // Drained only by the sequential phase; later phases overflow it and
    // their notifications are dropped.
    let (outbox, mail) = Outbox::channel(16);
    let clock = Arc::new(ManualClock::new(T0));
    let ctx = EngineContext::new(Arc::new(dir), outbox).with_clock(clock.clone());
    let engine = Arc::new(Engine::new(data.join("tutorslot.wal"), ctx).unwrap());
    println!("  {ROOMS} rooms, {STUDENTS} students");
    Setup {
        engine,
        clock,
        mail,
    }
}

async fn new_slot(engine: &Engine, r: usize, i: usize) -> Ulid {
    let day = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ][i % 7];
    let start = ((i / 7) % 23) as u16 * 60;
    engine
        .create_slot(&tutor(r), &room(r), day, start, start + 60)
        .await
        .unwrap()
        .id
}

async fn phase1_sequential(engine: &Engine, mail: &mut mpsc::Receiver<Notification>) {
    let n = 150;
    let mut request_lat = Vec::with_capacity(n);
    let mut approve_lat = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let slot_id = new_slot(engine, 0, i).await;

        let t = Instant::now();
        let receipt = engine
            .request(&student(i % STUDENTS), &room(0), slot_id, info(i))
            .await
            .unwrap();
        request_lat.push(t.elapsed());
        let token = approve_token(mail, receipt.booking_id);

        let t = Instant::now();
        engine.approve(receipt.booking_id, &token).await.unwrap();
        approve_lat.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = (n * 3) as f64 / elapsed.as_secs_f64();
    println!("  {n} create/request/approve cycles in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("request", &mut request_lat);
    print_latency("approve", &mut approve_lat);
}

/// Every student races for the same slot; exactly one may win per slot.
async fn phase2_contention(engine: &Arc<Engine>) {
    let rounds = 20;
    let mut latencies = Vec::new();
    let mut winners = 0usize;
    let start = Instant::now();

    for round in 0..rounds {
        let r = 1 + round % (ROOMS - 1);
        let slot_id = new_slot(engine, r, round).await;
        let handles: Vec<_> = (0..STUDENTS)
            .map(|s| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let t = Instant::now();
                    let result = engine.request(&student(s), &room(r), slot_id, info(s)).await;
                    (t.elapsed(), result.is_ok())
                })
            })
            .collect();
        let mut won = 0;
        for h in handles {
            let (lat, ok) = h.await.unwrap();
            latencies.push(lat);
            won += ok as usize;
        }
        assert_eq!(won, 1, "slot {slot_id} had {won} winners");
        winners += won;
    }

    let elapsed = start.elapsed();
    println!(
        "  {rounds} slots x {STUDENTS} students in {:.2}s, {winners} winners",
        elapsed.as_secs_f64()
    );
    print_latency("contended request", &mut latencies);
}

async fn phase3_read_under_load(engine: &Arc<Engine>) {
    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 20..140 {
                let slot_id = new_slot(&engine, ROOMS - 1, i).await;
                let _ = engine
                    .request(&student(i % STUDENTS), &room(ROOMS - 1), slot_id, info(i))
                    .await;
            }
        })
    };

    let mut latencies = Vec::new();
    while !writer.is_finished() {
        let t = Instant::now();
        let slots = engine.list_room_slots(&room(ROOMS - 1)).await.unwrap();
        latencies.push(t.elapsed());
        std::hint::black_box(slots);
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
    print_latency("list_room_slots under writes", &mut latencies);
}

async fn phase4_sweep(engine: &Engine, clock: &ManualClock) {
    clock.advance(DAY);
    let start = Instant::now();
    let mut expired = 0;
    loop {
        let report = sweeper::sweep_once(engine, 500).await;
        expired += report.expired;
        if report.expired == 0 {
            break;
        }
    }
    let elapsed = start.elapsed();
    println!("  expired {expired} bookings in {:.2}ms", elapsed.as_secs_f64() * 1000.0);

    let start = Instant::now();
    engine.compact_wal().await.unwrap();
    println!("  compaction took {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);
}

#[tokio::main]
async fn main() {
    println!("=== tutorslot stress benchmark ===\n");

    println!("[setup]");
    let Setup {
        engine,
        clock,
        mut mail,
    } = setup();

    println!("\n[phase 1] sequential lifecycle throughput");
    phase1_sequential(&engine, &mut mail).await;

    println!("\n[phase 2] contention on a single slot");
    phase2_contention(&engine).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&engine).await;

    println!("\n[phase 4] sweep and compaction");
    phase4_sweep(&engine, &clock).await;

    println!("\n=== benchmark complete ===");
}
