use serde::Serialize;

/// One row of the `/scan` response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScanEntry {
    pub ssid: String,
    pub rssi: i32,
}

/// Submitted `/save` form fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveForm {
    pub ssid: String,
    pub password: String,
}

/// Keeps scan results in scan order, dropping hidden networks (empty SSID).
/// No dedup, no sorting.
pub fn visible_networks<I>(entries: I) -> Vec<ScanEntry>
where
    I: IntoIterator<Item = ScanEntry>,
{
    entries
        .into_iter()
        .filter(|entry| !entry.ssid.is_empty())
        .collect()
}

/// Parses an `application/x-www-form-urlencoded` body into the `/save`
/// fields. `None` when the `ssid` field is missing or a value is not valid
/// UTF-8 after decoding; an absent `password` field decodes to empty.
pub fn parse_save_form(body: &str) -> Option<SaveForm> {
    let mut ssid = None;
    let mut password = None;

    for pair in body.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "ssid" => ssid = Some(decode_component(value)?),
            "password" => password = Some(decode_component(value)?),
            _ => {}
        }
    }

    Some(SaveForm {
        ssid: ssid?,
        password: password.unwrap_or_default(),
    })
}

fn decode_component(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            b'%' => {
                let hex = bytes.get(i + 1..i + 3)?;
                let high = char::from(hex[0]).to_digit(16)?;
                let low = char::from(hex[1]).to_digit(16)?;
                decoded.push((high * 16 + low) as u8);
                i += 3;
            }
            byte => {
                decoded.push(byte);
                i += 1;
            }
        }
    }

    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(ssid: &str, rssi: i32) -> ScanEntry {
        ScanEntry {
            ssid: ssid.to_string(),
            rssi,
        }
    }

    #[test]
    fn hidden_networks_are_dropped_and_order_kept() {
        let networks = visible_networks(vec![
            entry("Home", -40),
            entry("", -52),
            entry("Barn", -71),
            entry("Home", -80),
        ]);

        assert_eq!(
            networks,
            vec![entry("Home", -40), entry("Barn", -71), entry("Home", -80)]
        );
    }

    #[test]
    fn scan_response_is_a_json_array_of_ssid_and_rssi() {
        let json =
            serde_json::to_value(visible_networks(vec![entry("Home", -40), entry("", -52)]))
                .unwrap();

        assert_eq!(json, serde_json::json!([{"ssid": "Home", "rssi": -40}]));
    }

    #[test]
    fn parses_plain_form_fields() {
        let form = parse_save_form("ssid=Home&password=secret").unwrap();
        assert_eq!(form.ssid, "Home");
        assert_eq!(form.password, "secret");
    }

    #[test]
    fn decodes_percent_escapes_and_plus() {
        let form = parse_save_form("ssid=Caf%C3%A9+Net&password=p%26w%3Dd").unwrap();
        assert_eq!(form.ssid, "Café Net");
        assert_eq!(form.password, "p&w=d");
    }

    #[test]
    fn password_may_be_absent() {
        let form = parse_save_form("ssid=OpenNetwork").unwrap();
        assert_eq!(form.ssid, "OpenNetwork");
        assert_eq!(form.password, "");
    }

    #[test]
    fn missing_ssid_or_bad_escape_is_rejected() {
        assert_eq!(parse_save_form("password=secret"), None);
        assert_eq!(parse_save_form("ssid=bad%2"), None);
        assert_eq!(parse_save_form("ssid=bad%zz"), None);
    }
}
