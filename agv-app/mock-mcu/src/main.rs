mod sim;

use std::{
    cell::RefCell,
    error::Error,
    io::{self, BufRead, Write},
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use agv_core::{
    mk_static,
    utils::{
        controllers::{imu, motor::Motor},
        math::kinematics::Wheel,
        DefaultLayout, DriveLayout, EventFlag, LinkFramer, MonotonicClock, RobotConfig,
        SystemController,
    },
};
use clap::Parser;
use critical_section as _;
use sim::{SimBurst, SimImuBus, SimPin, SimPwm, SimRangeBus, StdDelay};
use tracing::{info, warn};

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// JSON file overriding any subset of the robot configuration
    #[clap(long)]
    config: Option<PathBuf>,
    /// distance reported by the simulated ranging sensor
    #[clap(long, default_value_t = 500)]
    range_mm: u16,
    /// stop after this many simulated milliseconds instead of running forever
    #[clap(long)]
    run_ms: Option<u32>,
    /// measure IMU offsets at startup instead of using the stored table
    #[clap(long)]
    calibrate: bool,
}

type Controller = SystemController<'static, DefaultLayout, SimRangeBus, SimBurst, SimPin, SimPwm>;

static LINK: LinkFramer = LinkFramer::new();
static IMU_DONE: EventFlag = EventFlag::new();
static CLOCK: MonotonicClock = MonotonicClock::new();

fn load_config(path: Option<&PathBuf>) -> Result<RobotConfig, Box<dyn Error>> {
    let Some(path) = path else {
        return Ok(RobotConfig::default());
    };
    let text = std::fs::read_to_string(path)?;
    let config = serde_json::from_str(&text)?;
    info!("loaded configuration from {}", path.display());
    Ok(config)
}

/// UART receive interrupt: every stdin line arrives as one DMA idle-line burst.
fn spawn_uart_rx() {
    thread::spawn(|| {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    LINK.feed_slice(line.as_bytes());
                    LINK.feed(b'\n');
                }
                Err(e) => {
                    warn!("stdin closed: {}", e);
                    break;
                }
            }
        }
    });
}

/// 1 kHz timer interrupt: advance the clock and start any queued
/// transmission. The simulated DMA finishes instantly.
fn spawn_timer() {
    thread::spawn(|| {
        let start = Instant::now();
        let mut ticked: u32 = 0;
        loop {
            thread::sleep(Duration::from_millis(1));
            let target = start.elapsed().as_millis() as u32;
            if target > ticked {
                CLOCK.advance(target - ticked);
                ticked = target;
            }
            let started = LINK.start_transmit(|bytes| {
                let mut out = io::stdout().lock();
                let _ = out.write_all(bytes);
                let _ = out.flush();
            });
            if started {
                LINK.on_transmit_complete();
            }
        }
    });
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let opts: Opts = Opts::parse();
    let config = load_config(opts.config.as_ref())?;
    info!(layout = DefaultLayout::NAME, range_mm = opts.range_mm, "mock MCU starting");

    let imu_bus = RefCell::new(SimImuBus::new(config.imu));
    let mut delay = StdDelay;
    let health = imu::init_sensors(&imu_bus, &config.imu, &mut delay)
        .map_err(|e| format!("IMU bring-up failed: {:?}", e))?;

    let offsets = if opts.calibrate {
        info!("calibrating IMU, keep the robot still");
        imu::calibrate(&mut *imu_bus.borrow_mut(), config.imu.accel_range, &mut delay)
            .map_err(|e| format!("IMU calibration failed: {:?}", e))?
    } else {
        imu::CalibrationOffsets::from_table(config.imu.accel_range, config.imu.gyro_range)
    };

    let motors = Wheel::ALL.map(|wheel| {
        Motor::new(
            SimPin::new(wheel, "IN1"),
            SimPin::new(wheel, "IN2"),
            SimPwm::new(wheel),
        )
    });
    let ctrl = mk_static!(
        Controller,
        SystemController::new(
            &LINK,
            &IMU_DONE,
            config,
            motors,
            SimRangeBus::new(opts.range_mm),
            SimBurst::new(&IMU_DONE, &config.imu),
            offsets,
        )
    );
    ctrl.startup(health);

    spawn_uart_rx();
    spawn_timer();

    let Some(limit) = opts.run_ms else {
        ctrl.run(&CLOCK);
    };

    while CLOCK.now() < limit {
        ctrl.poll(CLOCK.now());
        thread::yield_now();
    }

    let stats = LINK.stats();
    let (motion, magnetic) = ctrl.imu().sample_counts();
    info!(
        frames = stats.frames,
        discarded = stats.discarded,
        overwritten = stats.overwritten,
        "link"
    );
    info!(
        reading = ?ctrl.ranging().reading(),
        timeouts = ctrl.ranging().timeouts(),
        "ranging"
    );
    info!(motion, magnetic, sample = ?ctrl.imu().sample(), "imu");
    Ok(())
}
