use std::{
    io::ErrorKind,
    net::{Ipv4Addr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{FixedOffset, Utc};
use embedded_svc::{
    http::Method,
    io::{Read, Write},
    mqtt::client::QoS,
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    gpio::{Gpio22, Gpio34, Input, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, EventPayload, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::{EspSntp, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use agroflow_common::{
    command::{self, Command},
    dns, portal,
    topics::{command_topic, TOPIC_TELEMETRY},
    BootMode, Calibration, Credentials, DeviceIdentity, JoinAttempt, PublishTicker, ScanEntry,
    TelemetrySample, JOIN_POLL_INTERVAL_MS, PUBLISH_INTERVAL_MS,
};

use crate::pages::{PORTAL_HTML, SAVED_HTML};

const NVS_NAMESPACE: &str = "sensor-config";
const NVS_SSID_KEY: &str = "ssid";
const NVS_PASSWORD_KEY: &str = "password";

const MQTT_HOST: &str = "test.mosquitto.org";
const MQTT_PORT: u16 = 1883;
const MQTT_RETRY_DELAY_SECS: u64 = 5;

// Raw ADC readings for a probe in open air and submerged in water. The
// probe reads higher when drier; `Calibration::new` enforces the ordering
// at startup.
const DRY_VALUE: u16 = 2850;
const WET_VALUE: u16 = 1350;

// Local display offset for the post-sync log line; published timestamps
// are plain epoch milliseconds.
const UTC_OFFSET_HOURS: i32 = -3;

const DNS_PORT: u16 = 53;
const MAX_HTTP_BODY: usize = 1024;
const LOOP_IDLE_MS: u64 = 50;
const SAVE_RESTART_DELAY_SECS: u64 = 3;

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

impl NvsStore {
    fn load(&self) -> anyhow::Result<Credentials> {
        let _guard = self.lock.lock().unwrap();
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;

        let mut buffer = [0_u8; 128];
        let ssid = nvs
            .get_str(NVS_SSID_KEY, &mut buffer)?
            .unwrap_or_default()
            .to_string();

        let mut buffer = [0_u8; 128];
        let password = nvs
            .get_str(NVS_PASSWORD_KEY, &mut buffer)?
            .unwrap_or_default()
            .to_string();

        Ok(Credentials { ssid, password })
    }

    fn save(&self, credentials: &Credentials) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        nvs.set_str(NVS_SSID_KEY, &credentials.ssid)?;
        nvs.set_str(NVS_PASSWORD_KEY, &credentials.password)?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        nvs.remove(NVS_SSID_KEY)?;
        nvs.remove(NVS_PASSWORD_KEY)?;
        Ok(())
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let calibration = Calibration::new(DRY_VALUE, WET_VALUE)
        .map_err(|err| anyhow!("invalid soil calibration: {err}"))?;

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let store = NvsStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let identity = DeviceIdentity::from_mac(read_mac()?);
    info!("device identity: {identity}");

    let Peripherals {
        modem, pins, adc1, ..
    } = Peripherals::take()?;

    let mut reset_pin = PinDriver::input(pins.gpio22)?;
    reset_pin.set_pull(Pull::Up)?;

    // Reset-confirmation line, held low for the process lifetime.
    let mut reset_ack_pin = PinDriver::output(pins.gpio23)?;
    reset_ack_pin.set_low()?;
    let _reset_ack_pin = reset_ack_pin;

    if reset_pin.is_low() {
        info!("physical reset detected at boot");
        clear_config_and_restart(&store);
    }

    let wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;

    match BootMode::decide(store.load()?) {
        BootMode::Provisioning => run_provisioning_portal(wifi, sys_loop, store, &identity),
        BootMode::Operating(credentials) => run_operating_mode(
            wifi,
            store,
            identity,
            credentials,
            calibration,
            adc1,
            pins.gpio34,
            reset_pin,
        ),
    }
}

fn run_provisioning_portal(
    mut wifi: EspWifi<'static>,
    sys_loop: EspSystemEventLoop,
    store: NvsStore,
    identity: &DeviceIdentity,
) -> anyhow::Result<()> {
    let ap_ssid = identity.ap_ssid();

    // Mixed mode: open AP for the portal, station interface kept around so
    // `/scan` can look for nearby networks.
    wifi.set_configuration(&Configuration::Mixed(
        ClientConfiguration::default(),
        AccessPointConfiguration {
            ssid: ap_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("provisioning AP SSID too long"))?,
            auth_method: AuthMethod::None,
            channel: 1,
            ..Default::default()
        },
    ))?;

    {
        let mut blocking = BlockingWifi::wrap(&mut wifi, sys_loop)?;
        blocking.start()?;
        blocking.wait_netif_up()?;
    }

    let ap_ip = wifi.ap_netif().get_ip_info()?.ip;
    info!("provisioning AP `{ap_ssid}` up, portal at http://{ap_ip}");

    let wifi = Arc::new(Mutex::new(wifi));
    let _server = create_portal_http_server(store, wifi)?;

    // Never returns: the `/save` handler schedules the restart that ends
    // provisioning mode.
    serve_captive_dns(ap_ip)
}

/// Answers every DNS query with the access point's own address so captive
/// clients land on the portal regardless of the hostname they try.
fn serve_captive_dns(ap_ip: Ipv4Addr) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", DNS_PORT)).context("failed to bind dns socket")?;
    socket.set_read_timeout(Some(Duration::from_millis(50)))?;

    let addr = ap_ip.octets();
    let mut packet = [0_u8; 512];

    loop {
        match socket.recv_from(&mut packet) {
            Ok((len, peer)) => {
                if let Some(response) = dns::answer_query(&packet[..len], addr) {
                    if let Err(err) = socket.send_to(&response, peer) {
                        warn!("captive dns send failed: {err}");
                    }
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                thread::sleep(Duration::from_millis(1));
            }
            Err(err) => warn!("captive dns recv failed: {err}"),
        }
    }
}

fn create_portal_http_server(
    store: NvsStore,
    wifi: Arc<Mutex<EspWifi<'static>>>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
            .write_all(PORTAL_HTML.as_bytes())?;
        Ok(())
    })?;

    server.fn_handler::<anyhow::Error, _>("/scan", Method::Get, move |req| {
        let networks = {
            let mut wifi = wifi.lock().unwrap();
            scan_networks(&mut wifi)?
        };
        let body = serde_json::to_vec(&networks)?;
        req.into_response(
            200,
            Some("OK"),
            &[("Content-Type", "application/json; charset=utf-8")],
        )?
        .write_all(&body)?;
        Ok(())
    })?;

    server.fn_handler::<anyhow::Error, _>("/save", Method::Post, move |mut req| {
        let body = read_request_body(&mut req)?;
        let body = String::from_utf8(body).context("save form is not valid utf-8")?;

        let Some(form) = portal::parse_save_form(&body) else {
            return write_error(req, 400, "missing ssid field");
        };
        if form.ssid.is_empty() {
            return write_error(req, 400, "ssid cannot be empty");
        }

        store.save(&Credentials::new(form.ssid.clone(), form.password))?;
        info!(
            "credentials saved for `{}`; restarting in {}s",
            form.ssid, SAVE_RESTART_DELAY_SECS
        );

        req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
            .write_all(SAVED_HTML.as_bytes())?;

        schedule_restart(Duration::from_secs(SAVE_RESTART_DELAY_SECS));
        Ok(())
    })?;

    // Captive fallback: every other path gets the configuration page.
    server.fn_handler::<anyhow::Error, _>("/*", Method::Get, move |req| {
        req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
            .write_all(PORTAL_HTML.as_bytes())?;
        Ok(())
    })?;

    Ok(server)
}

fn scan_networks(wifi: &mut EspWifi<'static>) -> anyhow::Result<Vec<ScanEntry>> {
    let found = wifi.scan().context("wifi scan failed")?;
    Ok(portal::visible_networks(found.into_iter().map(|ap| {
        ScanEntry {
            ssid: ap.ssid.to_string(),
            rssi: i32::from(ap.signal_strength),
        }
    })))
}

#[allow(clippy::too_many_arguments)]
fn run_operating_mode(
    mut wifi: EspWifi<'static>,
    store: NvsStore,
    identity: DeviceIdentity,
    credentials: Credentials,
    calibration: Calibration,
    adc1: ADC1,
    soil_pin: Gpio34,
    reset_pin: PinDriver<'static, Gpio22, Input>,
) -> anyhow::Result<()> {
    let auth_method = if credentials.password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: credentials
            .ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: credentials
            .password
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    wifi.connect()?;
    info!("joining `{}`", credentials.ssid);

    // Bounded join: a fixed budget of status checks, then the stored
    // credentials are treated as bad.
    let mut attempt = JoinAttempt::new();
    while !wifi.is_up()? {
        if !attempt.record_failed_check() {
            warn!(
                "failed to join `{}` after {} status checks; credentials may be wrong",
                credentials.ssid,
                attempt.failed_checks()
            );
            clear_config_and_restart(&store);
        }
        thread::sleep(Duration::from_millis(JOIN_POLL_INTERVAL_MS));
    }

    let ip = wifi.sta_netif().get_ip_info()?.ip;
    info!("wifi connected, ip {ip}");

    // pool.ntp.org via the default server set; sync completion is polled in
    // the publish path.
    let sntp = EspSntp::new_default()?;
    info!("clock sync started");

    let command_topic = command_topic(identity.as_str());
    let mqtt_connected = Arc::new(AtomicBool::new(false));
    let resubscribe_needed = Arc::new(AtomicBool::new(false));
    let reset_requested = Arc::new(AtomicBool::new(false));

    let (mut mqtt, conn) = create_mqtt_client(&identity)?;
    spawn_mqtt_event_thread(
        conn,
        command_topic.clone(),
        mqtt_connected.clone(),
        resubscribe_needed.clone(),
        reset_requested.clone(),
    );

    let adc = AdcDriver::new(adc1)?;
    let adc_config = AdcChannelConfig {
        attenuation: DB_11,
        ..Default::default()
    };
    let mut soil_channel = AdcChannelDriver::new(&adc, soil_pin, &adc_config)?;

    let mut ticker = PublishTicker::new(PUBLISH_INTERVAL_MS);
    let mut sync_logged = false;

    loop {
        if reset_pin.is_low() {
            info!("physical reset detected during operation");
            clear_config_and_restart(&store);
        }
        if reset_requested.load(Ordering::SeqCst) {
            clear_config_and_restart(&store);
        }

        if !wifi.is_up()? {
            warn!("wifi link lost; restarting");
            thread::sleep(Duration::from_secs(1));
            restart_device();
        }

        // Broker down: block here until the client has reconnected.
        while !mqtt_connected.load(Ordering::SeqCst) {
            info!("waiting for mqtt broker at {MQTT_HOST}:{MQTT_PORT}");
            thread::sleep(Duration::from_secs(MQTT_RETRY_DELAY_SECS));
        }

        if resubscribe_needed.swap(false, Ordering::SeqCst) {
            match mqtt.subscribe(&command_topic, QoS::AtLeastOnce) {
                Ok(_) => info!("subscribed to command topic `{command_topic}`"),
                Err(err) => {
                    warn!("subscribe to `{command_topic}` failed: {err}");
                    resubscribe_needed.store(true, Ordering::SeqCst);
                }
            }
        }

        if ticker.poll(monotonic_ms()) {
            let raw = adc.read(&mut soil_channel).context("soil adc read failed")?;
            info!("raw soil reading: {raw}");
            let humidity = calibration.moisture_percent(raw);

            if sntp.get_sync_status() != SyncStatus::Completed {
                info!("clock not yet synced; sample skipped");
            } else {
                if !sync_logged {
                    log_local_time();
                    sync_logged = true;
                }

                let sample = TelemetrySample {
                    id: identity.as_str().to_string(),
                    humidity,
                    timestamp: Utc::now().timestamp_millis() as u64,
                };
                match sample.to_json() {
                    Ok(payload) => match mqtt.publish(TOPIC_TELEMETRY, QoS::AtLeastOnce, false, &payload) {
                        Ok(_) => info!("published {}", String::from_utf8_lossy(&payload)),
                        Err(err) => warn!("telemetry publish failed: {err}"),
                    },
                    Err(err) => warn!("telemetry serialization failed: {err}"),
                }
            }
        }

        thread::sleep(Duration::from_millis(LOOP_IDLE_MS));
    }
}

fn create_mqtt_client(
    identity: &DeviceIdentity,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{MQTT_HOST}:{MQTT_PORT}");
    let conf = MqttClientConfiguration {
        client_id: Some(identity.as_str()),
        ..Default::default()
    };
    Ok(EspMqttClient::new(&url, &conf)?)
}

fn spawn_mqtt_event_thread(
    mut conn: EspMqttConnection,
    command_topic: String,
    connected: Arc<AtomicBool>,
    resubscribe_needed: Arc<AtomicBool>,
    reset_requested: Arc<AtomicBool>,
) {
    thread::Builder::new()
        .name("mqtt-events".to_string())
        .stack_size(8192)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        info!("mqtt connected");
                        connected.store(true, Ordering::SeqCst);
                        resubscribe_needed.store(true, Ordering::SeqCst);
                    }
                    EventPayload::Disconnected => {
                        warn!("mqtt disconnected");
                        connected.store(false, Ordering::SeqCst);
                    }
                    EventPayload::Received { topic, data, .. } => {
                        if let Some(topic) = topic {
                            handle_command_message(topic, data, &command_topic, &reset_requested);
                        }
                    }
                    _ => {}
                },
                Err(err) => {
                    warn!("mqtt event stream error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                }
            }
        })
        .expect("failed to spawn mqtt thread");
}

fn handle_command_message(
    topic: &str,
    payload: &[u8],
    command_topic: &str,
    reset_requested: &AtomicBool,
) {
    info!(
        "message received on `{topic}`: `{}`",
        String::from_utf8_lossy(payload)
    );
    if topic != command_topic {
        return;
    }
    if payload.is_empty() {
        warn!("empty command payload");
        return;
    }

    match command::parse(payload) {
        Some(Command::Reset) => {
            info!("remote reset command accepted");
            reset_requested.store(true, Ordering::SeqCst);
        }
        None => warn!("invalid command payload"),
    }
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_error(
    mut req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "text/plain; charset=utf-8")],
    )?
    .write_all(message.as_bytes())?;
    Ok(())
}

fn schedule_restart(delay: Duration) {
    thread::Builder::new()
        .name("restart-request".into())
        .spawn(move || {
            thread::sleep(delay);
            restart_device();
        })
        .expect("failed to spawn restart thread");
}

fn restart_device() -> ! {
    unsafe { esp_idf_svc::sys::esp_restart() };
    unreachable!("esp_restart returned")
}

fn clear_config_and_restart(store: &NvsStore) -> ! {
    info!("clearing stored configuration and restarting");
    if let Err(err) = store.clear() {
        warn!("failed to clear credential store: {err:#}");
    }
    thread::sleep(Duration::from_secs(1));
    restart_device()
}

fn read_mac() -> anyhow::Result<[u8; 6]> {
    let mut mac = [0_u8; 6];
    let rc = unsafe { esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) };
    if rc != esp_idf_svc::sys::ESP_OK {
        return Err(anyhow!("esp_efuse_mac_get_default failed with code {rc}"));
    }
    Ok(mac)
}

fn log_local_time() {
    match FixedOffset::east_opt(UTC_OFFSET_HOURS * 3600) {
        Some(offset) => {
            let local = Utc::now().with_timezone(&offset);
            info!("clock synced, local time {}", local.format("%d/%m/%Y %H:%M:%S"));
        }
        None => info!("clock synced"),
    }
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
