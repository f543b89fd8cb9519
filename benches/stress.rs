use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms
/// 2090-01-01T00:00:00Z, far enough ahead that no reschedule starts in the past.
const BASE: i64 = 3_786_912_000_000;

async fn connect(host: &str, port: u16, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("opsched")
        .password("opsched");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_tenant() -> String {
    format!("bench_{}", Ulid::new())
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

/// One work order `wo` with `n` one-hour operations chained back to back on
/// machine `machine`, leaving a one-hour gap after each.
async fn seed_chain(client: &tokio_postgres::Client, wo: &str, machine: &str, n: usize, offset: i64) {
    client
        .batch_execute(&format!(
            "INSERT INTO work_orders (id, product, qty) VALUES ('{wo}', 'Bench', 1)"
        ))
        .await
        .unwrap();
    let rows: Vec<String> = (0..n)
        .map(|i| {
            let s = BASE + offset + (i as i64) * 2 * HOUR;
            let e = s + HOUR;
            format!("('{wo}-{i}', '{wo}', {i}, '{machine}', 'step {i}', {s}, {e})")
        })
        .collect();
    client
        .batch_execute(&format!(
            r#"INSERT INTO operations (id, work_order_id, "index", machine_id, name, start, "end") VALUES {}"#,
            rows.join(", ")
        ))
        .await
        .unwrap();
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_tenant()).await;
    let n_ops = 500;
    seed_chain(&client, "W", "M1", n_ops, 0).await;

    // Shift every operation by 30 minutes inside its own gap, back to front.
    let mut latencies = Vec::with_capacity(n_ops);
    let start = Instant::now();
    for i in (0..n_ops).rev() {
        let s = BASE + (i as i64) * 2 * HOUR + HOUR / 2;
        let e = s + HOUR;
        let t = Instant::now();
        client
            .batch_execute(&format!(
                r#"UPDATE operations SET start = {s}, "end" = {e} WHERE id = 'W-{i}'"#
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n_ops as f64 / elapsed.as_secs_f64();
    println!("  {n_ops} reschedules in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("reschedule latency", &mut latencies);
}

async fn phase2_contended(host: &str, port: u16) {
    // Many clients race to move their own operation into the same hours on
    // one machine. Operations start parked far apart on that machine.
    let tenant = fresh_tenant();
    let n_tasks = 20;
    let rounds = 50;

    let setup = connect(host, port, &tenant).await;
    for t in 0..n_tasks {
        let parked = (10_000 + 2 * t as i64) * HOUR;
        seed_chain(&setup, &format!("W{t}"), "M1", 1, parked).await;
    }
    drop(setup);

    let accepted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let host = host.to_string();
        let tenant = tenant.clone();
        let accepted = accepted.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            for r in 0..rounds {
                let s = BASE + (r as i64) * HOUR;
                let e = s + HOUR;
                let result = client
                    .batch_execute(&format!(
                        r#"UPDATE operations SET start = {s}, "end" = {e} WHERE id = 'W{t}-0'"#
                    ))
                    .await;
                match result {
                    Ok(()) => accepted.fetch_add(1, Ordering::Relaxed),
                    Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * rounds;
    println!(
        "  {n_tasks} tasks x {rounds} rounds = {total} attempts in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!(
        "  accepted={}, rejected={}",
        accepted.load(Ordering::Relaxed),
        rejected.load(Ordering::Relaxed)
    );
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let tenant = fresh_tenant();
    let setup = connect(host, port, &tenant).await;
    seed_chain(&setup, "R", "M1", 200, 0).await;
    drop(setup);

    // Writers shuffle their own chains on a separate machine of the same tenant.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let tenant = tenant.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            let wo = format!("WR{w}");
            seed_chain(&client, &wo, &format!("MW{w}"), 1, 0).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let s = BASE + (i % 1000) * HOUR;
                let e = s + HOUR;
                let _ = client
                    .batch_execute(&format!(
                        r#"UPDATE operations SET start = {s}, "end" = {e} WHERE id = '{wo}-0'"#
                    ))
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
        let tenant = tenant.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let op = (r * reads_per_reader + i) % 200;
                let sql = match i % 3 {
                    0 => format!("SELECT * FROM constraints WHERE operation_id = 'R-{op}'"),
                    1 => format!(
                        "SELECT * FROM valid_slot WHERE machine_id = 'M1' AND duration_hours = 1.5 AND preferred_start = {BASE}"
                    ),
                    _ => {
                        let s = BASE + (op as i64) * 2 * HOUR + HOUR / 4;
                        let e = s + HOUR;
                        format!(
                            r#"SELECT * FROM validation WHERE operation_id = 'R-{op}' AND start = {s} AND "end" = {e}"#
                        )
                    }
                };
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("constraint/slot/validation queries", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let start = Instant::now();
    let success = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_tenant()).await;
            seed_chain(&client, &format!("S{c}"), "M1", 10, 0).await;
            client.simple_query("SELECT * FROM floor_conflicts").await.unwrap();
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("OPSCHED_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("OPSCHED_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid OPSCHED_PORT");

    println!("=== opsched stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential reschedule throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended reschedules on one machine");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
