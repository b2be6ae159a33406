//! Captive-portal DNS: every well-formed query is answered with a single A
//! record pointing at the access point's own address, so any hostname a
//! client tries lands on the configuration page.

const HEADER_LEN: usize = 12;

/// Response flags: QR=1, opcode query, RA=1, rcode 0.
const RESPONSE_FLAGS: u16 = 0x8180;

const ANSWER_TTL_SECS: u32 = 60;

/// Builds the wildcard answer for one query datagram. `None` for packets
/// with no question or a truncated/compressed question section; the caller
/// drops those on the floor.
pub fn answer_query(query: &[u8], addr: [u8; 4]) -> Option<Vec<u8>> {
    if query.len() < HEADER_LEN {
        return None;
    }
    let question_count = u16::from_be_bytes([query[4], query[5]]);
    if question_count == 0 {
        return None;
    }

    let question_len = question_length(&query[HEADER_LEN..])?;
    let question_end = HEADER_LEN + question_len;

    let mut response = Vec::with_capacity(question_end + 16);
    response.extend_from_slice(&query[..2]); // transaction id echoed back
    response.extend_from_slice(&RESPONSE_FLAGS.to_be_bytes());
    response.extend_from_slice(&1_u16.to_be_bytes()); // questions
    response.extend_from_slice(&1_u16.to_be_bytes()); // answers
    response.extend_from_slice(&0_u16.to_be_bytes()); // authority
    response.extend_from_slice(&0_u16.to_be_bytes()); // additional
    response.extend_from_slice(&query[HEADER_LEN..question_end]);

    // Answer: compressed pointer back to the question name, type A, class
    // IN, fixed TTL, the portal address.
    response.extend_from_slice(&[0xC0, HEADER_LEN as u8]);
    response.extend_from_slice(&1_u16.to_be_bytes());
    response.extend_from_slice(&1_u16.to_be_bytes());
    response.extend_from_slice(&ANSWER_TTL_SECS.to_be_bytes());
    response.extend_from_slice(&4_u16.to_be_bytes());
    response.extend_from_slice(&addr);

    Some(response)
}

/// Length of the first question (labels + root + QTYPE + QCLASS), or `None`
/// when truncated. Compression pointers never appear in queries we serve.
fn question_length(question: &[u8]) -> Option<usize> {
    let mut i = 0;
    loop {
        let label_len = *question.get(i)? as usize;
        if label_len == 0 {
            break;
        }
        if label_len & 0xC0 != 0 {
            return None;
        }
        i += 1 + label_len;
    }

    let end = i + 1 + 4;
    if end > question.len() {
        return None;
    }
    Some(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Standard query for `example.com`, type A, class IN.
    fn example_query() -> Vec<u8> {
        let mut query = vec![
            0xAB, 0xCD, // id
            0x01, 0x00, // recursion desired
            0x00, 0x01, // one question
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        query.extend_from_slice(b"\x07example\x03com\x00");
        query.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        query
    }

    #[test]
    fn answers_any_name_with_the_portal_address() {
        let query = example_query();
        let response = answer_query(&query, [192, 168, 4, 1]).unwrap();

        // Header: echoed id, response flags, 1 question, 1 answer.
        assert_eq!(&response[..2], &[0xAB, 0xCD]);
        assert_eq!(&response[2..4], &0x8180_u16.to_be_bytes());
        assert_eq!(&response[4..6], &[0x00, 0x01]);
        assert_eq!(&response[6..8], &[0x00, 0x01]);

        // Question section is copied verbatim.
        assert_eq!(&response[12..query.len()], &query[12..]);

        // Answer ends with rdlength 4 and the address.
        assert_eq!(&response[response.len() - 6..], &[0, 4, 192, 168, 4, 1]);
    }

    #[test]
    fn rejects_short_and_questionless_packets() {
        assert_eq!(answer_query(&[0x00; 5], [192, 168, 4, 1]), None);

        let mut no_question = example_query();
        no_question[5] = 0;
        assert_eq!(answer_query(&no_question, [192, 168, 4, 1]), None);
    }

    #[test]
    fn rejects_truncated_question() {
        let query = example_query();
        assert_eq!(answer_query(&query[..query.len() - 3], [192, 168, 4, 1]), None);
    }
}
