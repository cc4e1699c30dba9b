//! Watchdog binary - main entry point.
//!
//! - `watchdog serve`: run a watchdog reading commands from stdin. This is
//!   what `Daemonizer` launches; it is rarely started by hand.
//! - `watchdog demo`: spawn a watchdog and drive it with a scripted sequence
//!   that arms regularly, stops arming for a while, then quits.
//!
//! `serve` detaches into its own session before the Tokio runtime exists:
//! `setsid()` and the working directory change happen while the process is
//! still single-threaded, then the runtime is built by hand.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use liveness_watchdog::types::{ChannelClosePolicy, Config, PERIOD_ENV};
use liveness_watchdog::watchdog::{
    detach_session, Daemonizer, PipeWatchdog, RunOutcome, Watchdog, WatchdogHandle,
};
use liveness_watchdog::{observability, Result, WatchdogConfig};

/// Exit status when `serve` cannot start.
const STARTUP_FAILURE_EXIT_CODE: i32 = 1;

/// Liveness watchdog
#[derive(Parser, Debug)]
#[command(name = "watchdog", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a watchdog reading commands from stdin
    Serve(ServeArgs),
    /// Spawn a watchdog and replay a scripted command sequence
    Demo(DemoArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Arm period in milliseconds
    #[arg(long, env = PERIOD_ENV)]
    period_ms: Option<u64>,

    /// Bytes per channel read
    #[arg(long)]
    read_buffer_bytes: Option<usize>,

    /// Exit status used when the watchdog trips
    #[arg(long)]
    trip_exit_code: Option<i32>,

    /// What to do when the owner closes the channel
    #[arg(long, value_enum)]
    on_channel_closed: Option<ClosePolicyArg>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

#[derive(Args, Debug)]
struct DemoArgs {
    /// Arm period of the spawned watchdog in milliseconds
    #[arg(long, default_value_t = 2000)]
    period_ms: u64,

    /// Delay between script steps in milliseconds
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,

    /// Number of script steps; `quit` is sent on the last one
    #[arg(long, default_value_t = 20)]
    steps: u32,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ClosePolicyArg {
    Silence,
    Quit,
}

impl From<ClosePolicyArg> for ChannelClosePolicy {
    fn from(arg: ClosePolicyArg) -> Self {
        match arg {
            ClosePolicyArg::Silence => ChannelClosePolicy::Silence,
            ClosePolicyArg::Quit => ChannelClosePolicy::Quit,
        }
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let code = match serve(args) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("watchdog: {e}");
                    STARTUP_FAILURE_EXIT_CODE
                }
            };
            std::process::exit(code);
        }
        Commands::Demo(args) => {
            observability::init_tracing(&Default::default())?;
            demo(args)?;
        }
    }

    Ok(())
}

fn load_config(args: &ServeArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    }
    .with_env_overrides()?;

    let wd = &mut config.watchdog;
    if let Some(ms) = args.period_ms {
        wd.period = Duration::from_millis(ms);
    }
    if let Some(bytes) = args.read_buffer_bytes {
        wd.read_buffer_bytes = bytes;
    }
    if let Some(code) = args.trip_exit_code {
        wd.trip_exit_code = code;
    }
    if let Some(policy) = args.on_channel_closed {
        wd.on_channel_closed = policy.into();
    }
    if args.log_file.is_some() {
        config.observability.log_file = args.log_file.clone();
    }
    config.observability.json_logs |= args.json_logs;

    config.watchdog.validate()?;
    Ok(config)
}

/// Run the watchdog on stdin. Returns the process exit status.
fn serve(args: ServeArgs) -> Result<i32> {
    let config = load_config(&args)?;

    // The log file is opened before the working directory changes.
    observability::init_tracing(&config.observability)?;

    if !detach_session()? {
        tracing::warn!("session_detach_skipped: already a process group leader");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    let watchdog_config = config.watchdog.clone();
    let outcome = runtime.block_on(async move {
        let mut watchdog = PipeWatchdog::new(watchdog_config, tokio::io::stdin())?;
        watchdog.run().await
    });
    // A stdin read may still be parked on a blocking thread.
    runtime.shutdown_background();

    let code = match outcome? {
        RunOutcome::Quit | RunOutcome::ChannelClosed => 0,
        RunOutcome::Tripped => config.watchdog.trip_exit_code,
    };
    tracing::info!("watchdog_exiting: code={}", code);
    Ok(code)
}

/// Scripted owner: arms every step except steps 7..=10, removes the id added
/// three steps earlier, dumps every sixth step and quits on the last step.
fn demo(args: DemoArgs) -> Result<()> {
    let config = WatchdogConfig::with_period(Duration::from_millis(args.period_ms));
    let mut handle = Daemonizer::new(config)?.spawn()?;
    let tick = Duration::from_millis(args.tick_ms);

    for step in 1..=args.steps {
        println!("{step}");
        std::thread::sleep(tick);

        if let Err(e) = demo_step(&mut handle, step, args.steps) {
            tracing::warn!("demo_send_failed: step={}, error={}", step, e);
            break;
        }
    }

    let status = handle.wait()?;
    println!("watchdog exited: {status}");
    Ok(())
}

fn demo_step(handle: &mut WatchdogHandle, step: u32, steps: u32) -> Result<()> {
    if !(7..11).contains(&step) {
        handle.add(&format!("000-{step}-000"))?;
        handle.arm()?;
    }
    if step > 4 {
        handle.remove(&format!("000-{}-000", step - 3))?;
    }
    if step % 6 == 0 {
        handle.dump()?;
    }
    if step == steps {
        handle.quit()?;
    }
    Ok(())
}
