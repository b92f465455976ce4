//! Sync tick example - the caller owns the loop.
//!
//! Run with: cargo run -p tickmqtt-client --example polling
//!
//! Set `RUST_LOG=debug` to watch the engine.

use std::thread;
use std::time::Duration;

use tickmqtt_client::{
    BrokerAddress, Client, Config, ConnectArgs, DisconnectArgs, Event, PublishOptions, QoS,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let client = Client::tcp(config)?;

    println!("Connecting to broker...");
    client.connect(
        BrokerAddress::new("localhost", 1883),
        ConnectArgs::new("polling-example").keep_alive(30),
    )?;

    loop {
        client.tick()?;

        while let Some(event) = client.try_next_event() {
            match event {
                Event::Connect(details) => {
                    if !details.is_successful {
                        println!("Connect failed: {:?}", details.reason_code);
                        return Ok(());
                    }
                    println!("Connected! Session present: {}", details.session_present);
                    client.subscribe(&[("example/polling/#", QoS::AtLeastOnce)])?;
                    client.publish(
                        "example/polling/hello",
                        "Hello from polling client!",
                        &PublishOptions::new(QoS::AtLeastOnce),
                    )?;
                }

                Event::SubscribeAck(ack) => {
                    println!(
                        "Subscribed (packet_id={}): {:?}",
                        ack.packet_id, ack.reason_codes
                    );
                }

                Event::Publish(publish) => {
                    println!(
                        "Message: {} -> {} (QoS={:?}, retain={})",
                        publish.topic,
                        String::from_utf8_lossy(&publish.payload),
                        publish.qos,
                        publish.retain
                    );
                    client.disconnect(DisconnectArgs::default())?;
                }

                Event::PublishCompleted(done) => {
                    println!("Publish acknowledged (packet_id={})", done.packet_id);
                }

                Event::Disconnect { reason_code, .. } => {
                    println!("Disconnected: {:?}", reason_code);
                    return Ok(());
                }

                Event::Error { code, message } => println!("Error {:?}: {}", code, message),

                _ => {}
            }
        }

        thread::sleep(Duration::from_millis(10));
    }
}
