use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;
/// 2099-01-01T00:00:00, far enough ahead that nothing has started yet.
const BASE: i64 = 4_070_908_800_000;
const SLOTS_PER_DAY: i64 = 22;

async fn connect(host: &str, port: u16, db: &str) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(db)
        .user("bench")
        .password(std::env::var("COVERS_PASSWORD").unwrap_or_else(|_| "covers".into()));

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

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

/// One-hour slot `i`, packed into opening hours day after day.
fn slot(i: i64) -> (i64, i64) {
    let start = BASE + (i / SLOTS_PER_DAY) * DAY + (i % SLOTS_PER_DAY) * HOUR;
    (start, start + HOUR)
}

async fn first_id(client: &Client, sql: &str) -> String {
    let msgs = client.simple_query(sql).await.expect("insert failed");
    msgs.into_iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get("id").map(str::to_string),
            _ => None,
        })
        .expect("no row returned")
}

struct Venue {
    restaurant_id: String,
    customer_id: String,
}

/// A restaurant open 00:00-23:00 with `n_tables` tables of 2, 4 and 6 seats.
async fn setup_venue(client: &Client, n_tables: u32) -> Venue {
    let restaurant_id = first_id(
        client,
        "INSERT INTO restaurants (name, open_time, close_time) VALUES ('Bench Bistro', '00:00', '23:00')",
    )
    .await;
    for n in 1..=n_tables {
        let capacity = [2, 4, 6][(n % 3) as usize];
        client
            .batch_execute(&format!(
                "INSERT INTO tables (restaurant_id, table_number, capacity) VALUES ('{restaurant_id}', {n}, {capacity})"
            ))
            .await
            .unwrap();
    }
    let phone = format!("555-{}", &Ulid::new().to_string()[20..]);
    let customer_id = first_id(
        client,
        &format!("INSERT INTO customers (name, phone) VALUES ('Bench', '{phone}')"),
    )
    .await;
    Venue {
        restaurant_id,
        customer_id,
    }
}

fn booking_sql(venue: &Venue, party: u32, (start, end): (i64, i64)) -> String {
    format!(
        "INSERT INTO reservations (restaurant_id, customer_id, party_size, start_time, end_time) \
         VALUES ('{}', '{}', {party}, {start}, {end})",
        venue.restaurant_id, venue.customer_id
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &format!("bench_{}", Ulid::new())).await;
    let venue = setup_venue(&client, 1).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        client
            .batch_execute(&booking_sql(&venue, 2, slot(i as i64)))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many clients race for the same slots in one restaurant. Every slot must end
/// up with exactly as many reservations as there are tables.
async fn phase2_contention(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let n_tables = 6;
    let setup = connect(host, port, &db).await;
    let venue = Arc::new(setup_venue(&setup, n_tables).await);
    drop(setup);

    let n_tasks = 20;
    let n_slots = 50;
    let booked = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let db = db.clone();
        let venue = venue.clone();
        let booked = booked.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let mut latencies = Vec::with_capacity(n_slots);
            for i in 0..n_slots {
                let t = Instant::now();
                match client.batch_execute(&booking_sql(&venue, 2, slot(i as i64))).await {
                    Ok(()) => booked.fetch_add(1, Ordering::Relaxed),
                    Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
                };
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }
    let elapsed = start.elapsed();
    let booked = booked.load(Ordering::Relaxed);
    let expected = n_slots * n_tables as usize;
    println!(
        "  {n_tasks} tasks x {n_slots} slots in {:.2}s: {booked} booked, {} rejected (expected {expected} booked){}",
        elapsed.as_secs_f64(),
        rejected.load(Ordering::Relaxed),
        if booked == expected { "" } else { "  <-- MISMATCH" }
    );
    print_latency("contended write latency", &mut all_latencies);
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let setup = connect(host, port, &db).await;
    let venue = Arc::new(setup_venue(&setup, 30).await);
    for i in 0..500 {
        setup
            .batch_execute(&booking_sql(&venue, 2, slot(i)))
            .await
            .unwrap();
    }
    drop(setup);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5i64 {
        let host = host.to_string();
        let db = db.clone();
        let venue = venue.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = client
                    .batch_execute(&booking_sql(&venue, 4, slot(1000 + w * 10_000 + i)))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 300;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let db = db.clone();
        let rid = venue.restaurant_id.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let mut availability = Vec::with_capacity(reads_per_reader);
            let mut by_date = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let (start, end) = slot((r * reads_per_reader + i) as i64 % 500);
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "SELECT * FROM available_tables WHERE restaurant_id = '{rid}' \
                         AND start_time >= {start} AND end_time <= {end}"
                    ))
                    .await
                    .unwrap();
                availability.push(t.elapsed());

                let day = chrono::DateTime::from_timestamp_millis(start)
                    .map(|dt| dt.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "SELECT * FROM reservations WHERE restaurant_id = '{rid}' AND date = '{day}'"
                    ))
                    .await
                    .unwrap();
                by_date.push(t.elapsed());
            }
            (availability, by_date)
        }));
    }

    let mut availability = Vec::new();
    let mut by_date = Vec::new();
    for h in reader_handles {
        let (a, d) = h.await.unwrap();
        availability.extend(a);
        by_date.extend(d);
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("available_tables query", &mut availability);
    print_latency("reservations-by-date query", &mut by_date);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("bench_{}", Ulid::new())).await;
            let venue = setup_venue(&client, 3).await;
            for i in 0..ops_per_conn {
                client
                    .batch_execute(&booking_sql(&venue, 2, slot(i)))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("COVERS_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("COVERS_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid COVERS_PORT");

    println!("=== covers stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential reservation throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended slots");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== done ===");
}
