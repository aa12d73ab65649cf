use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use pair_rtc::config::Config;
use pair_rtc::controller::PairingController;
use pair_rtc::media::{LogRenderer, SyntheticCapture};
use pair_rtc::signaling::SignalingChannel;
use pair_rtc::transport::rtc::RtcTransportFactory;
use pair_rtc::traversal::TraversalResolver;
use pair_rtc::util::init_log;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_log();

    info!("Starting pair-rtc, relay at {}", config.relay_url);

    let channel = SignalingChannel::connect(config.relay_url.clone(), config.reconnect_policy());
    let controller = PairingController::new(
        Arc::new(SyntheticCapture {
            audio: !config.no_audio,
            video: !config.no_video,
        }),
        Arc::new(LogRenderer),
        Arc::new(TraversalResolver::new(
            config.ice_credentials_url.clone(),
            config.ice_timeout(),
        )),
        Arc::new(RtcTransportFactory::new(config.bind)),
        channel,
    );

    let handle = controller.handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => handle.hang_up(),
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    let mut status = controller.subscribe_status();
    let printer = tokio::spawn(async move {
        println!("{}", *status.borrow_and_update());
        while status.changed().await.is_ok() {
            println!("{}", *status.borrow_and_update());
        }
    });

    let status = controller.run().await;
    // The printer drains the last change once the controller is gone.
    let _ = printer.await;
    info!("Finished: {}", status);

    Ok(())
}
