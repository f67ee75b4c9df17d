use clap::Parser;
use serial_bridge::bridge::{Bridge, PollWaiter, StdConsole};
use serial_bridge::cli::{Args, Settings};
use serial_bridge::config::{Config, ConfigLoader};
use serial_bridge::lifecycle::{ExitCode, ExitController, Outcome, StopFlag, StopReason};
use serial_bridge::port::{available_ports, TtyPort};
use serial_bridge::session::SessionStats;
use serial_bridge::{logging, AppError, AppResult};
use std::time::{Duration, Instant};
use tracing::{debug, info};

type Controller = ExitController<TtyPort, StdConsole>;

/// Slice length for the start wait so a signal is noticed promptly.
const START_WAIT_SLICE: Duration = Duration::from_millis(10);

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() {
                ExitCode::Argument
            } else {
                ExitCode::Ok
            };
            let _ = e.print();
            std::process::exit(code.code());
        }
    };

    // Reports failures that happen before any device is touched.
    let early = Controller::new(args.verbose(), args.color);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => early.exit(e.into(), None),
    };
    logging::init(&config.logging, args.verbose(), args.debug);

    if args.list {
        list_ports(early);
    }

    let settings = match args.resolve(&config) {
        Ok(settings) => settings,
        Err(e) => early.exit(e.into(), None),
    };
    drop(early);

    let mut controller = Controller::new(settings.verbose, settings.colors);
    let (outcome, stats) = run(&settings, &mut controller);
    controller.exit(outcome, stats)
}

fn load_config(args: &Args) -> AppResult<Config> {
    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    if let Some(path) = &loader.config_path {
        debug!(path = %path.display(), "configuration loaded");
    }
    Ok(loader.into_config())
}

fn list_ports(controller: Controller) -> ! {
    match available_ports() {
        Ok(ports) if ports.is_empty() => println!("No serial ports found."),
        Ok(ports) => {
            for port in ports {
                println!("{}\t{}", port.name, port.description);
            }
        }
        Err(e) => controller.exit(AppError::from(e).into(), None),
    }
    std::process::exit(ExitCode::Ok.code())
}

fn run(settings: &Settings, controller: &mut Controller) -> (Outcome, Option<SessionStats>) {
    let stop = StopFlag::new();
    match prepare(settings, controller, &stop) {
        Ok(None) => {}
        Ok(Some(reason)) => return (reason.into(), None),
        Err(e) => return (e.into(), None),
    }

    let Some((port, console)) = controller.split_mut() else {
        return (AppError::Fatal("bridge started without port or console".into()).into(), None);
    };

    let mut bridge = Bridge::new(settings.bridge.clone(), settings.matcher.clone());
    let outcome = match bridge.run(port, console, &mut PollWaiter::new(), &stop) {
        Ok(reason) => Outcome::Stopped(reason),
        Err(e) => Outcome::Failed(e.into()),
    };
    (outcome, Some(bridge.stats()))
}

/// Install signal handlers, open the device and the console, then honour
/// the start wait. Returns a stop reason if a signal arrived meanwhile.
fn prepare(
    settings: &Settings,
    controller: &mut Controller,
    stop: &StopFlag,
) -> AppResult<Option<StopReason>> {
    stop.install().map_err(AppError::Signals)?;

    let port = TtyPort::open(settings.port.clone())?;
    if settings.debug {
        debug!("\n{}", port.dump());
    }
    controller.attach_port(port);
    info!(device = %settings.port.device, baud = settings.port.baud_rate, "port opened");

    let console = StdConsole::open(settings.input.as_deref(), settings.output.as_deref())?;
    debug!(?console, "console ready");
    controller.attach_console(console);

    if !settings.start_wait.is_zero() {
        debug!(wait = ?settings.start_wait, "start wait");
        let deadline = Instant::now() + settings.start_wait;
        loop {
            if let Some(signal) = stop.pending() {
                return Ok(Some(StopReason::Signal(signal)));
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(START_WAIT_SLICE.min(deadline - now));
        }
    }
    Ok(None)
}
