use awesome_pid::{load_options_or, shared, PidController, PidLoop, PidOptions};
use crossbeam::channel::RecvTimeoutError;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RUN_LIMIT: Duration = Duration::from_secs(60);

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "awesome_pid=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("===========================================");
    println!("PID demo: drive a value toward its target");
    println!("===========================================\n");

    // Demo values, used when the options file is missing
    let demo = PidOptions::default()
        .with_tuning(0.5, 0.05, 0.1)
        .with_interval_ms(300)
        .with_initial(0.0)
        .with_target(100.0)
        .with_bounds(-30.0, 30.0);
    let options = load_options_or("config/pid.toml", demo);

    let mut pid = match PidController::new(options) {
        Ok(pid) => pid,
        Err(e) => {
            eprintln!("Invalid options: {e}");
            std::process::exit(1);
        }
    };

    println!("kp: {} | ki: {} | kd: {} | dt: {}ms", pid.kp(), pid.ki(), pid.kd(), pid.dt_ms());
    println!("input: {} | target: {}", pid.input(), pid.target());
    println!("upper bound: {:?} | lower bound: {:?}\n", pid.upper_bound(), pid.lower_bound());

    let (_, outputs) = pid.output_channel();
    let target = pid.target();
    let mut current_value = pid.input();

    let controller = shared(pid);
    let mut pid_loop = PidLoop::new(controller.clone());

    println!("Starting loop...");
    pid_loop.start_loop();

    let started = Instant::now();
    while started.elapsed() < RUN_LIMIT {
        let output = match outputs.recv_timeout(Duration::from_secs(1)) {
            Ok(output) => output,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // The simulated plant integrates the controller output
        current_value += output;
        println!("Output: {:>4} | Value: {:>4}", output.trunc(), current_value.trunc());
        controller.lock().set_input(current_value);

        if current_value.trunc() == target.trunc() {
            pid_loop.stop_loop();
            println!("\nCurrent value equal to target value. Stopping loop.");
            break;
        }
    }

    if pid_loop.is_running() {
        pid_loop.stop_loop();
        println!("\nRun limit of {:?} reached. Stopping loop.", RUN_LIMIT);
    }

    let report = pid_loop.metrics().report();
    println!("\n=== Loop Metrics ===");
    println!("Ticks: {} ({} skipped)", report.ticks, report.skipped);
    println!("Compute P50: {:?}, P99: {:?}", report.compute_p50, report.compute_p99);
    println!("Jitter P50: {:?}, P99: {:?}", report.jitter_p50, report.jitter_p99);
}
