use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Deserialize;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use agroflow_common::{
    command::{self, Command},
    portal,
    topics::{command_topic, TOPIC_TELEMETRY},
    BootMode, Calibration, Credentials, DeviceIdentity, PublishTicker, ScanEntry,
    TelemetrySample, PUBLISH_INTERVAL_MS,
};

use crate::pages::{PORTAL_HTML, SAVED_HTML};

const DRY_VALUE: u16 = 2850;
const WET_VALUE: u16 = 1350;

/// MAC used when `AGROFLOW_MAC` is not set; gives a stable identity for
/// local development.
const DEV_MAC: [u8; 6] = [0xA4, 0x07, 0x03, 0x1E, 0x22, 0x9A];

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let calibration = Calibration::new(DRY_VALUE, WET_VALUE)
        .map_err(|err| anyhow!("invalid soil calibration: {err}"))?;

    let store = FileStore::new();
    let identity = device_identity();
    info!("device identity: {identity}");

    match BootMode::decide(store.load().await?) {
        BootMode::Provisioning => run_provisioning_portal(store, &identity).await,
        BootMode::Operating(credentials) => {
            run_operating_mode(store, identity, credentials, calibration).await
        }
    }
}

#[derive(Clone)]
struct FileStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl FileStore {
    fn new() -> Self {
        let data_dir = std::env::var("AGROFLOW_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.agroflow"));

        Self {
            path: Arc::new(data_dir.join("credentials.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load(&self) -> anyhow::Result<Credentials> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Credentials::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, credentials: &Credentials) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_vec_pretty(credentials)?).await?;
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(self.path.as_ref()).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Clone)]
struct PortalState {
    store: FileStore,
}

#[derive(Debug, Deserialize)]
struct SaveRequest {
    ssid: String,
    #[serde(default)]
    password: String,
}

async fn run_provisioning_portal(
    store: FileStore,
    identity: &DeviceIdentity,
) -> anyhow::Result<()> {
    info!(
        "no stored credentials; on hardware this would be AP `{}`",
        identity.ap_ssid()
    );

    let app = Router::new()
        .route("/", get(handle_portal_page))
        .route("/scan", get(handle_scan))
        .route("/save", post(handle_save))
        .fallback(handle_portal_page)
        .with_state(PortalState { store });

    let port = std::env::var("PORTAL_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse().unwrap();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind portal server at {addr}"))?;

    info!("portal listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_portal_page() -> Html<&'static str> {
    Html(PORTAL_HTML)
}

async fn handle_scan() -> Json<Vec<ScanEntry>> {
    Json(portal::visible_networks(simulated_networks()))
}

/// Hardware integration point: the ESP build scans through the radio; the
/// host portal serves a fixed neighborhood.
fn simulated_networks() -> Vec<ScanEntry> {
    vec![
        ScanEntry {
            ssid: "Home".to_string(),
            rssi: -41,
        },
        ScanEntry {
            ssid: "Barn".to_string(),
            rssi: -67,
        },
        ScanEntry {
            ssid: String::new(),
            rssi: -73,
        },
    ]
}

async fn handle_save(
    State(state): State<PortalState>,
    Form(request): Form<SaveRequest>,
) -> impl IntoResponse {
    if request.ssid.is_empty() {
        return (StatusCode::BAD_REQUEST, "ssid cannot be empty").into_response();
    }

    let credentials = Credentials::new(request.ssid.clone(), request.password);
    if let Err(err) = state.store.save(&credentials).await {
        warn!("failed to persist credentials: {err:#}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to persist credentials",
        )
            .into_response();
    }

    info!("credentials saved for `{}`; restarting in 3s", request.ssid);
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        restart_process();
    });

    Html(SAVED_HTML).into_response()
}

async fn run_operating_mode(
    store: FileStore,
    identity: DeviceIdentity,
    credentials: Credentials,
    calibration: Calibration,
) -> anyhow::Result<()> {
    info!(
        "operating with stored network `{}` (wireless join is hardware-only)",
        credentials.ssid
    );

    let mqtt_host =
        std::env::var("MQTT_HOST").unwrap_or_else(|_| "test.mosquitto.org".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new(identity.as_str(), mqtt_host, mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);
    let topic = command_topic(identity.as_str());

    {
        let mqtt = mqtt.clone();
        let store = store.clone();
        let topic = topic.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("mqtt connected");
                        // Re-subscribe on every (re)connect.
                        match mqtt.subscribe(&topic, QoS::AtLeastOnce).await {
                            Ok(()) => info!("subscribed to command topic `{topic}`"),
                            Err(err) => warn!("subscribe to `{topic}` failed: {err}"),
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(message))) => {
                        handle_command_message(&message.topic, &message.payload, &topic, &store)
                            .await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("mqtt poll error: {err}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
    }

    let mut ticker = PublishTicker::new(PUBLISH_INTERVAL_MS);
    let mut probe = SimulatedProbe::new();
    let mut interval = tokio::time::interval(Duration::from_millis(250));

    loop {
        interval.tick().await;
        if !ticker.poll(monotonic_ms()) {
            continue;
        }

        let raw = probe.read();
        info!("raw soil reading: {raw}");
        let humidity = calibration.moisture_percent(raw);

        let sample = TelemetrySample {
            id: identity.as_str().to_string(),
            humidity,
            timestamp: Utc::now().timestamp_millis() as u64,
        };

        match sample.to_json() {
            Ok(payload) => {
                match mqtt
                    .publish(TOPIC_TELEMETRY, QoS::AtLeastOnce, false, payload.clone())
                    .await
                {
                    Ok(()) => info!("published {}", String::from_utf8_lossy(&payload)),
                    Err(err) => warn!("telemetry publish failed: {err}"),
                }
            }
            Err(err) => warn!("telemetry serialization failed: {err}"),
        }
    }
}

async fn handle_command_message(topic: &str, payload: &[u8], expected: &str, store: &FileStore) {
    info!(
        "message received on `{topic}`: `{}`",
        String::from_utf8_lossy(payload)
    );
    if topic != expected {
        return;
    }
    if payload.is_empty() {
        warn!("empty command payload");
        return;
    }

    match command::parse(payload) {
        Some(Command::Reset) => {
            info!("remote reset command accepted; clearing credentials");
            if let Err(err) = store.clear().await {
                warn!("failed to clear credential store: {err:#}");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            restart_process();
        }
        None => warn!("invalid command payload"),
    }
}

/// Hardware integration point: the ESP build samples the probe through the
/// ADC; on host a slowly wandering raw value stands in.
struct SimulatedProbe {
    tick: u64,
}

impl SimulatedProbe {
    fn new() -> Self {
        Self { tick: 0 }
    }

    fn read(&mut self) -> u16 {
        self.tick = self.tick.wrapping_add(1);
        let swing = ((self.tick % 40) as i32 - 20) * 25;
        (2_100 + swing).clamp(0, 4_095) as u16
    }
}

fn device_identity() -> DeviceIdentity {
    let mac = std::env::var("AGROFLOW_MAC")
        .ok()
        .and_then(|value| parse_mac(&value))
        .unwrap_or(DEV_MAC);
    DeviceIdentity::from_mac(mac)
}

fn parse_mac(value: &str) -> Option<[u8; 6]> {
    let digits: String = value.chars().filter(char::is_ascii_hexdigit).collect();
    if digits.len() != 12 {
        return None;
    }

    let mut mac = [0_u8; 6];
    for (i, byte) in mac.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(mac)
}

/// Host stand-in for the device restart: exit and let the supervisor
/// relaunch the binary.
fn restart_process() -> ! {
    info!("exiting for restart");
    std::process::exit(0)
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
