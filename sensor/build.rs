fn main() {
    // ESP-IDF linking applies only to esp32 feature builds.
    if std::env::var("CARGO_FEATURE_ESP32").is_ok() {
        embuild::espidf::sysenv::output();
    }
}
