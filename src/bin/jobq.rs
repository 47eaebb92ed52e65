use clap::{crate_authors, crate_version, Clap};
use crossbeam::channel::unbounded;
use jobq::{FnJob, JobQueue, QueueConfig, ShutdownMode};
use rand::Rng;
use slog::*;
use std::{process::exit, thread, time::Duration};

#[derive(Clap)]
#[clap(version = crate_version!(), author = crate_authors!())]
struct Options {
    #[clap(long, short, default_value = "3")]
    workers: usize,

    #[clap(long, short, default_value = "9")]
    jobs: usize,

    /// How long each job sleeps before computing its digit sum
    #[clap(long, default_value = "50")]
    sleep_ms: u64,

    /// Ready pool capacity, defaults to the worker count
    #[clap(long)]
    capacity: Option<usize>,

    #[clap(long, default_value = "drain")]
    shutdown: ShutdownMode,

    /// Make every n-th job panic
    #[clap(long)]
    panic_every: Option<usize>,

    /// Print the shutdown report as JSON
    #[clap(long)]
    json: bool,
}

struct DigitSum {
    job: usize,
    number: u32,
    sum: u32,
}

fn main() {
    let options = Options::parse();
    let code = {
        let logger = logger();
        match run(&options, &logger) {
            Ok(()) => 0,
            Err(e) => {
                error!(&logger, "{}", e);
                1
            }
        }
        // logger dropped here so the async drain flushes
    };
    exit(code);
}

fn logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, o!())
}

fn run(options: &Options, logger: &Logger) -> std::result::Result<(), failure::Error> {
    info!(logger, "jobq starting";
        "version" => crate_version!(),
        "workers" => options.workers,
        "jobs" => options.jobs,
        "shutdown" => %options.shutdown
    );

    let mut config = QueueConfig::new(options.workers)
        .shutdown(options.shutdown)
        .logger(logger.new(o!("component" => "queue")));
    if let Some(capacity) = options.capacity {
        config = config.pool_capacity(capacity);
    }
    let queue = JobQueue::with_config(config)?;
    queue.start()?;

    let (results, collected) = unbounded();
    let mut rng = rand::thread_rng();
    let delay = Duration::from_millis(options.sleep_ms);
    for n in 0..options.jobs {
        let number = rng.gen_range(0..1000);
        let fail = matches!(options.panic_every, Some(k) if k > 0 && (n + 1) % k == 0);
        let results = results.clone();
        queue.submit(FnJob::named(format!("digits-{}", n), move || {
            thread::sleep(delay);
            if fail {
                panic!("job {} was told to fail", n);
            }
            let _ = results.send(DigitSum {
                job: n,
                number,
                sum: digit_sum(number),
            });
        }))?;
    }
    drop(results);

    let report = queue.stop()?;
    for r in collected.iter() {
        info!(logger, "digit sum"; "job" => r.job, "number" => r.number, "sum" => r.sum);
    }

    if options.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!(
            "executed {} panicked {} discarded {} in {}ms",
            report.executed, report.panicked, report.discarded, report.elapsed_ms
        );
    }
    Ok(())
}

fn digit_sum(mut number: u32) -> u32 {
    let mut sum = 0;
    while number != 0 {
        sum += number % 10;
        number /= 10;
    }
    sum
}
