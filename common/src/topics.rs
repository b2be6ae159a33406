/// All sensor nodes publish telemetry to the same topic; samples carry the
/// device identity in the payload.
pub const TOPIC_TELEMETRY: &str = "sensors/humidity";

/// Per-device command topic.
pub fn command_topic(identity: &str) -> String {
    format!("sensors/{identity}/command")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_topic_interpolates_identity() {
        assert_eq!(
            command_topic("A407031E229A"),
            "sensors/A407031E229A/command"
        );
    }
}
