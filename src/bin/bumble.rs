use anyhow::Result;
use bumble::{
    configuration::AppConfig,
    controller::RobotController,
    driver::ZenohRobotLink,
    error::ErrorWrapper,
    logging,
    messages::{
        json_payload, text_payload, MODE_COMMAND_TOPIC, ODOMETRY_TOPIC, SENSOR_FRAME_TOPIC,
        VELOCITY_COMMAND_TOPIC,
    },
};
use clap::Parser;
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};
use tracing::*;
use zenoh::{
    prelude::r#async::*, publication::Publisher, subscriber::FlumeSubscriber, SessionDeclarations,
};

#[derive(Parser, Debug)]
#[command(
    version,
    author = "David M. Weis <dweis7@gmail.com>",
    about = "Bumble"
)]
struct Args {
    /// path to config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbosity);

    let app_config = AppConfig::load_config(&args.config)?;

    let zenoh_config = app_config.zenoh.get_zenoh_config()?;
    let zenoh_session = zenoh::open(zenoh_config)
        .res()
        .await
        .map_err(ErrorWrapper::ZenohError)?
        .into_arc();

    let link =
        ZenohRobotLink::new(zenoh_session.clone(), app_config.base.max_wheel_speed_mm_s).await?;
    let mut controller =
        RobotController::new(app_config.base.clone(), Box::new(link), Instant::now());
    controller.initialise().await?;

    let odometry_publisher = zenoh_session
        .declare_publisher(ODOMETRY_TOPIC)
        .res()
        .await
        .map_err(ErrorWrapper::ZenohError)?;
    let mut sensor_subscriber = zenoh_session
        .declare_subscriber(SENSOR_FRAME_TOPIC)
        .res()
        .await
        .map_err(ErrorWrapper::ZenohError)?;
    let mut velocity_subscriber = zenoh_session
        .declare_subscriber(VELOCITY_COMMAND_TOPIC)
        .res()
        .await
        .map_err(ErrorWrapper::ZenohError)?;
    let mut command_subscriber = zenoh_session
        .declare_subscriber(MODE_COMMAND_TOPIC)
        .res()
        .await
        .map_err(ErrorWrapper::ZenohError)?;

    let loop_result = tokio::select! {
        result = run_loop(
            &mut controller,
            &odometry_publisher,
            &mut sensor_subscriber,
            &mut velocity_subscriber,
            &mut command_subscriber,
            app_config.cycle_rate_hz,
        ) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Caught interrupt");
            Ok(())
        }
    };

    // park the base even when the loop itself failed
    let shutdown_result = controller.shutdown().await;
    loop_result.and(shutdown_result)
}

async fn run_loop(
    controller: &mut RobotController,
    odometry_publisher: &Publisher<'_>,
    sensor_subscriber: &mut FlumeSubscriber<'_>,
    velocity_subscriber: &mut FlumeSubscriber<'_>,
    command_subscriber: &mut FlumeSubscriber<'_>,
    cycle_rate_hz: f64,
) -> Result<()> {
    let mut cycle = tokio::time::interval(Duration::from_secs_f64(1.0 / cycle_rate_hz));
    loop {
        tokio::select! {
            _ = cycle.tick() => {
                controller.tick(Instant::now()).await?;
            }
            sample = sensor_subscriber.recv_async() => {
                if let Some(frame) = json_payload(sample?.value, SENSOR_FRAME_TOPIC) {
                    let odometry = controller.handle_sensor_frame(&frame, Instant::now()).await?;
                    odometry_publisher
                        .put(serde_json::to_string(&odometry)?)
                        .res()
                        .await
                        .map_err(ErrorWrapper::ZenohError)?;
                }
            }
            sample = velocity_subscriber.recv_async() => {
                if let Some(command) = json_payload(sample?.value, VELOCITY_COMMAND_TOPIC) {
                    controller.handle_velocity_command(&command, Instant::now()).await?;
                }
            }
            sample = command_subscriber.recv_async() => {
                if let Some(token) = text_payload(sample?.value, MODE_COMMAND_TOPIC) {
                    if controller.handle_mode_token(token.trim()).await? {
                        info!("Exit requested");
                        return Ok(());
                    }
                }
            }
        }
    }
}
