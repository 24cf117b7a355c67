mod commands;
mod config;
mod db;
mod mqtt;
mod refresh;
mod state;
mod web;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use db::Db;
use mqtt::MetricsPublisher;
use state::HubState;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("GROWFLOW_LOG")
        .unwrap_or_else(|_| EnvFilter::new("growflow_hub=info,growflow_engine=info,warn"));
    let format = env::var("GROWFLOW_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);
    match format.as_str() {
        "json" => registry.with(fmt::layer().json().with_ansi(false)).init(),
        _ => registry.with(fmt::layer().compact()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let db_url =
        env::var("DB_URL").unwrap_or_else(|_| "sqlite:growflow.db?mode=rwc".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (seed plants) ───────────────────────────────────
    let cfg = config::load(&config_path)?;
    let utc_offset = cfg.hub.utc_offset()?;
    let today = OffsetDateTime::now_utc().to_offset(utc_offset).date();
    config::apply(&cfg, &db, today).await?;

    // ── Plant aggregates ────────────────────────────────────────────
    let shared = Arc::new(RwLock::new(HubState::new(utc_offset)));
    let loaded = commands::load_plants(&db, &shared, today).await?;
    if loaded == 0 {
        warn!("no plants loaded; add [[plants]] entries to {config_path}");
    }
    shared
        .write()
        .await
        .record_system(format!("hub started with {loaded} plant(s)"));

    // ── MQTT ────────────────────────────────────────────────────────
    let prefix = cfg.hub.mqtt_prefix.clone();
    let mut mqttoptions = MqttOptions::new("growflow-hub", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);
    let publisher = MetricsPublisher::new(client.clone(), prefix.clone());

    // ── Web server ──────────────────────────────────────────────────
    let app = web::AppState {
        shared: Arc::clone(&shared),
        db: db.clone(),
        publisher: Some(publisher.clone()),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(app, web_port).await {
            error!("web: {e:#}");
        }
    });

    // ── Refresh loop ────────────────────────────────────────────────
    let refresh_every = Duration::from_secs(
        u64::try_from(cfg.hub.refresh_interval_sec).context("refresh_interval_sec must be > 0")?,
    );
    tokio::spawn(refresh::run(
        Arc::clone(&shared),
        publisher.clone(),
        refresh_every,
    ));

    for topic in mqtt::subscriptions(&prefix) {
        client.subscribe(topic.as_str(), QoS::AtLeastOnce).await?;
        info!(%topic, "subscribed");
    }

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let Some((plant_id, parsed)) = mqtt::parse_command(&p.topic, &p.payload, &prefix)
                else {
                    warn!(topic = %p.topic, "unhandled topic");
                    continue;
                };

                let cmd = match parsed {
                    Ok(cmd) => cmd,
                    Err(msg) => {
                        warn!(plant = %plant_id, "bad command payload: {msg}");
                        shared
                            .write()
                            .await
                            .record_error(format!("{plant_id}: {msg}"));
                        continue;
                    }
                };

                // Rejections and persist failures are already logged and
                // recorded by execute. Publishes go through the client queue,
                // which only drains while this loop polls.
                if let Ok(snapshot) = commands::execute(&shared, &db, plant_id, cmd).await {
                    let publisher = publisher.clone();
                    let plant_id = plant_id.to_string();
                    tokio::spawn(async move {
                        if let Err(e) = publisher.publish(&plant_id, &snapshot).await {
                            error!(plant = %plant_id, "mqtt: {e:#}");
                        }
                    });
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                {
                    let mut st = shared.write().await;
                    st.mqtt_connected = true;
                    st.record_system("mqtt connected".to_string());
                }
                let (shared, publisher) = (Arc::clone(&shared), publisher.clone());
                tokio::spawn(async move {
                    refresh::refresh_all(&shared, &publisher).await;
                });
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                {
                    let mut st = shared.write().await;
                    st.mqtt_connected = false;
                    st.record_error(format!("mqtt error: {e}"));
                }
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
