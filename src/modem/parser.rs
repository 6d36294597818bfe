//! Response parsers, one per AT command family.
//!
//! Every parser takes the raw text captured by [`CommandSession`](super::CommandSession)
//! and returns a typed record or `None`. Captures are framed by timing only, so partial,
//! interleaved or garbled text is expected input, never a panic.
//!
//! Each family is a small grammar: a line prefix plus an ordered list of shape
//! alternatives built from the [`Fields`] scanner. The first shape that matches wins;
//! when none match the parser reports "no match".

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

/// Cursor over the comma separated fields that follow a `+XXXX:` prefix.
#[derive(Debug, Clone, Copy)]
struct Fields<'a> {
    rest: &'a str,
}

impl<'a> Fields<'a> {
    /// Fields of `line` if it starts with `prefix` (leading whitespace ignored).
    fn after_prefix(line: &'a str, prefix: &str) -> Option<Self> {
        line.trim().strip_prefix(prefix).map(|rest| Fields { rest })
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start_matches([' ', '\t']);
    }

    /// Optionally signed decimal integer.
    fn int(&mut self) -> Option<i64> {
        self.skip_ws();
        let bytes = self.rest.as_bytes();
        let sign = usize::from(bytes.first() == Some(&b'-'));
        let digits = bytes[sign..].iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        let (num, rest) = self.rest.split_at(sign + digits);
        self.rest = rest;
        num.parse().ok()
    }

    fn uint<T: TryFrom<i64>>(&mut self) -> Option<T> {
        self.int().and_then(|v| T::try_from(v).ok())
    }

    /// `"..."`, returning the inner text.
    fn quoted(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let inner = self.rest.strip_prefix('"')?;
        let end = inner.find('"')?;
        self.rest = &inner[end + 1..];
        Some(&inner[..end])
    }

    /// A field that may be empty (`,,`) or quoted.
    fn optional_quoted(&mut self) -> Option<Option<&'a str>> {
        self.skip_ws();
        if self.rest.starts_with('"') {
            self.quoted().map(Some)
        } else if self.rest.is_empty() || self.rest.starts_with(',') {
            Some(None)
        } else {
            None
        }
    }

    fn comma(&mut self) -> Option<()> {
        self.skip_ws();
        self.rest = self.rest.strip_prefix(',')?;
        Some(())
    }
}

/// Try `shapes` in order against every line carrying `prefix`.
fn first_match<T>(
    response: &str,
    prefix: &str,
    shapes: &[fn(Fields<'_>) -> Option<T>],
) -> Option<T> {
    response
        .lines()
        .filter_map(|line| Fields::after_prefix(line, prefix))
        .find_map(|fields| shapes.iter().find_map(|shape| shape(fields)))
}

/// True when the capture contains a final `OK` result line.
pub fn is_ok(response: &str) -> bool {
    response.lines().any(|l| l.trim() == "OK")
}

// ---------------------------------------------------------------------------
// Message listing: +CMGL: <index>,...
// ---------------------------------------------------------------------------

/// Indices from an `AT+CMGL` listing, in listing order.
///
/// Sender and text on listing lines are ignored: listing mode truncates UCS-2 payloads,
/// so every message is re-read with `AT+CMGR`. Indices are signed so a corrupted,
/// negative index still reaches the delete-safety checks.
pub fn parse_message_list(response: &str) -> Vec<i64> {
    response
        .lines()
        .filter_map(|line| Fields::after_prefix(line, "+CMGL:"))
        .filter_map(|mut f| {
            let index = f.int()?;
            f.comma()?;
            Some(index)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Single message: +CMGR: "<stat>","<sender>",[<alpha>],"<timestamp>"  + text lines
// ---------------------------------------------------------------------------

/// One message as returned by `AT+CMGR`, sender and text already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMessage {
    pub status: String,
    pub sender: String,
    pub text: String,
    /// `None` when the header carried no parsable timestamp.
    pub timestamp: Option<DateTime<Local>>,
}

struct CmgrHeader<'a> {
    status: &'a str,
    sender: &'a str,
    timestamp: Option<&'a str>,
}

fn cmgr_with_timestamp(mut f: Fields<'_>) -> Option<CmgrHeader<'_>> {
    let status = f.quoted()?;
    f.comma()?;
    let sender = f.quoted().filter(|s| !s.is_empty())?;
    f.comma()?;
    f.optional_quoted()?;
    f.comma()?;
    let timestamp = f.quoted()?;
    Some(CmgrHeader {
        status,
        sender,
        timestamp: Some(timestamp),
    })
}

fn cmgr_bare(mut f: Fields<'_>) -> Option<CmgrHeader<'_>> {
    let status = f.quoted()?;
    f.comma()?;
    let sender = f.quoted().filter(|s| !s.is_empty())?;
    Some(CmgrHeader {
        status,
        sender,
        timestamp: None,
    })
}

/// Parse an `AT+CMGR` capture. Requires the header and the final `OK`; the text is every
/// non-empty line up to the next header or `OK`, concatenated, with wrapping quotes
/// stripped.
///
/// The modem encodes sender and text with the same character set, so the text is only
/// decoded as UCS-2 when the sender is.
pub fn parse_single_message(response: &str) -> Option<ReadMessage> {
    if !is_ok(response) {
        return None;
    }
    let lines: Vec<&str> = response.lines().map(str::trim).collect();
    let header_at = lines.iter().position(|l| l.starts_with("+CMGR:"))?;
    let fields = Fields::after_prefix(lines[header_at], "+CMGR:")?;
    let shapes: [fn(Fields<'_>) -> Option<CmgrHeader<'_>>; 2] = [cmgr_with_timestamp, cmgr_bare];
    let header = shapes.iter().find_map(|shape| shape(fields))?;

    let body: String = lines[header_at + 1..]
        .iter()
        .take_while(|l| !l.starts_with("+CMGR:") && **l != "OK")
        .filter(|l| !l.is_empty())
        .copied()
        .collect();
    let text = body.trim().trim_matches('"').trim_matches('\'');

    let (sender, text) = match decode_ucs2(header.sender.trim()) {
        Some(sender) => (sender, decode_ucs2_or_plain(text)),
        None => (header.sender.to_string(), text.to_string()),
    };
    Some(ReadMessage {
        status: header.status.to_string(),
        sender,
        text,
        timestamp: header.timestamp.and_then(parse_timestamp),
    })
}

/// Decode a hex UCS-2 field (`00480069` -> `Hi`), or return it unchanged when it is not
/// one.
///
/// A field is treated as UCS-2 when it is non-empty, made of hex digits only, a multiple
/// of four long and decodes to valid UTF-16 without control characters. Purely decimal
/// fields are only decoded when every code unit is in the Latin-1 range, so short numeric
/// texts such as `2024` stay as typed.
pub fn decode_ucs2_or_plain(field: &str) -> String {
    decode_ucs2(field.trim()).unwrap_or_else(|| field.to_string())
}

fn decode_ucs2(hex: &str) -> Option<String> {
    if hex.is_empty() || hex.len() % 4 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let groups: Vec<&str> = hex
        .as_bytes()
        .chunks(4)
        .map(std::str::from_utf8)
        .collect::<Result<_, _>>()
        .ok()?;
    if hex.bytes().all(|b| b.is_ascii_digit()) && !groups.iter().all(|g| g.starts_with("00")) {
        return None;
    }
    let units = groups
        .iter()
        .map(|g| u16::from_str_radix(g, 16))
        .collect::<Result<Vec<u16>, _>>()
        .ok()?;
    let decoded: String = char::decode_utf16(units)
        .collect::<Result<_, _>>()
        .ok()?;
    if decoded
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        return None;
    }
    Some(decoded)
}

/// Parse `YY/MM/DD,HH:MM:SS±ZZ` as local time. The zone suffix is dropped.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    let raw = raw.trim();
    let stripped = match raw.rfind(['+', '-']) {
        Some(pos) if pos + 1 < raw.len() && raw[pos + 1..].bytes().all(|b| b.is_ascii_digit()) => {
            &raw[..pos]
        }
        _ => raw,
    };
    let naive = NaiveDateTime::parse_from_str(stripped, "%y/%m/%d,%H:%M:%S").ok()?;
    Local.from_local_datetime(&naive).earliest()
}

// ---------------------------------------------------------------------------
// Network registration: +CREG: <n>,<stat>[,"<lac>","<ci>",<act>]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Reporting mode `<n>` echoed by the modem.
    pub mode: u8,
    pub status: u8,
    pub lac: Option<String>,
    pub ci: Option<String>,
    pub act: Option<u8>,
}

impl Registration {
    pub fn status_text(&self) -> String {
        let known = match self.status {
            0 => "Not registered",
            1 => "Registered (home)",
            2 => "Searching",
            3 => "Registration denied",
            4 => "Unknown",
            5 => "Registered (roaming)",
            6 => "Registered (home, SMS only)",
            7 => "Registered (roaming, SMS only)",
            8 => "Emergency only",
            9 => "Registered (home, CSFB not preferred)",
            10 => "Registered (roaming, CSFB not preferred)",
            11 => "Emergency only",
            other => return format!("Unknown ({})", other),
        };
        known.to_string()
    }

    pub fn act_text(&self) -> Option<String> {
        let act = self.act?;
        let known = match act {
            0 => "GSM",
            1 => "GSM Compact",
            2 => "UTRAN",
            3 => "GSM w/EGPRS",
            4 => "UTRAN w/HSDPA",
            5 => "UTRAN w/HSUPA",
            6 => "UTRAN w/HSDPA and HSUPA",
            7 => "E-UTRAN (LTE)",
            8 => "UTRAN HSPA+/EC-GSM-IoT",
            other => return Some(format!("Unknown ({})", other)),
        };
        Some(known.to_string())
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.status, 1 | 5 | 6 | 7 | 9 | 10)
    }
}

fn creg_long(mut f: Fields<'_>) -> Option<Registration> {
    let mode = f.uint()?;
    f.comma()?;
    let status = f.uint()?;
    f.comma()?;
    let lac = f.quoted()?.to_string();
    f.comma()?;
    let ci = f.quoted()?.to_string();
    f.comma()?;
    let act = f.uint()?;
    Some(Registration {
        mode,
        status,
        lac: Some(lac),
        ci: Some(ci),
        act: Some(act),
    })
}

fn creg_short(mut f: Fields<'_>) -> Option<Registration> {
    let mode = f.uint()?;
    f.comma()?;
    let status = f.uint()?;
    Some(Registration {
        mode,
        status,
        lac: None,
        ci: None,
        act: None,
    })
}

pub fn parse_registration(response: &str) -> Option<Registration> {
    let shapes: [fn(Fields<'_>) -> Option<Registration>; 2] = [creg_long, creg_short];
    first_match(response, "+CREG:", &shapes)
}

// ---------------------------------------------------------------------------
// Signal quality: +CSQ: <rssi>,<ber>
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalQuality {
    /// Raw 0-31 indicator rescaled to 0-100.
    Percent(u8),
    /// 99 (not known or not detectable).
    Unknown,
}

impl SignalQuality {
    pub fn from_rssi(rssi: i64) -> Self {
        match rssi {
            0..=31 => SignalQuality::Percent((rssi * 100 / 31) as u8),
            _ => SignalQuality::Unknown,
        }
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalQuality::Percent(p) => write!(f, "{}%", p),
            SignalQuality::Unknown => write!(f, "N/A"),
        }
    }
}

fn csq(mut f: Fields<'_>) -> Option<SignalQuality> {
    let rssi = f.int()?;
    f.comma()?;
    f.int()?;
    Some(SignalQuality::from_rssi(rssi))
}

pub fn parse_signal_quality(response: &str) -> Option<SignalQuality> {
    let shapes: [fn(Fields<'_>) -> Option<SignalQuality>; 1] = [csq];
    first_match(response, "+CSQ:", &shapes)
}

// ---------------------------------------------------------------------------
// Current calls: +CLCC: <id>,<dir>,<stat>,<mode>,<mpty>[,"<number>",<type>]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Active,
    Held,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
    Unknown,
}

impl CallStatus {
    fn from_code(code: i64) -> Self {
        match code {
            0 => CallStatus::Active,
            1 => CallStatus::Held,
            2 => CallStatus::Dialing,
            3 => CallStatus::Alerting,
            4 => CallStatus::Incoming,
            5 => CallStatus::Waiting,
            _ => CallStatus::Unknown,
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallMode {
    Voice,
    Data,
    Fax,
    Unknown,
}

impl CallMode {
    fn from_code(code: i64) -> Self {
        match code {
            0 => CallMode::Voice,
            1 => CallMode::Data,
            2 => CallMode::Fax,
            _ => CallMode::Unknown,
        }
    }
}

impl fmt::Display for CallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub id: u32,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub mode: CallMode,
    pub multiparty: bool,
    pub number: Option<String>,
    pub number_type: Option<u16>,
}

fn clcc_head(f: &mut Fields<'_>) -> Option<CallRecord> {
    let id = f.uint()?;
    f.comma()?;
    let direction = match f.int()? {
        0 => CallDirection::Outgoing,
        1 => CallDirection::Incoming,
        _ => return None,
    };
    f.comma()?;
    let status = CallStatus::from_code(f.int()?);
    f.comma()?;
    let mode = CallMode::from_code(f.int()?);
    f.comma()?;
    let multiparty = f.int()? == 1;
    Some(CallRecord {
        id,
        direction,
        status,
        mode,
        multiparty,
        number: None,
        number_type: None,
    })
}

fn clcc_with_number(mut f: Fields<'_>) -> Option<CallRecord> {
    let mut record = clcc_head(&mut f)?;
    f.comma()?;
    let number = f.quoted()?;
    f.comma()?;
    record.number_type = Some(f.uint()?);
    record.number = Some(number.to_string()).filter(|n| !n.is_empty());
    Some(record)
}

fn clcc_bare(mut f: Fields<'_>) -> Option<CallRecord> {
    clcc_head(&mut f)
}

/// Incoming calls listed by `AT+CLCC`; outgoing records are dropped.
pub fn parse_call_list(response: &str) -> Vec<CallRecord> {
    let shapes: [fn(Fields<'_>) -> Option<CallRecord>; 2] = [clcc_with_number, clcc_bare];
    response
        .lines()
        .filter_map(|line| Fields::after_prefix(line, "+CLCC:"))
        .filter_map(|fields| shapes.iter().find_map(|shape| shape(fields)))
        .filter(|r| r.direction == CallDirection::Incoming)
        .collect()
}

// ---------------------------------------------------------------------------
// Storage counts: +CPMS: "<bank>",<used>,<total>,...
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCount {
    pub used: u32,
    pub total: u32,
}

impl fmt::Display for StorageCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.used, self.total)
    }
}

fn used_total(f: &mut Fields<'_>) -> Option<StorageCount> {
    let used = f.uint()?;
    f.comma()?;
    let total = f.uint()?;
    Some(StorageCount { used, total })
}

/// Used/total for `bank` from a `+CPMS:` line.
///
/// Shapes: the named form `"ME",2,10,"ME",2,10,...` (first group naming the bank), then
/// the unnamed set-command form `+CPMS: 2,10,2,10,...` (first pair).
pub fn parse_storage_count(response: &str, bank: &str) -> Option<StorageCount> {
    let needle = format!("\"{}\"", bank);
    response
        .lines()
        .filter_map(|line| Fields::after_prefix(line, "+CPMS:"))
        .find_map(|fields| {
            let named = fields.rest.find(&needle).and_then(|pos| {
                let mut f = Fields {
                    rest: &fields.rest[pos + needle.len()..],
                };
                f.comma()?;
                used_total(&mut f)
            });
            named.or_else(|| used_total(&mut fields.clone()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn listing_extracts_indices_only() {
        let raw = "\r\n+CMGL: 0,\"REC UNREAD\",\"+61412345678\",,\"25/10/25,19:33:13+44\"\r\n4F60\r\n\
                   +CMGL: 2,\"REC READ\",\"+61400000000\",,\"25/10/25,19:40:00+44\"\r\nhi\r\n\r\nOK\r\n";
        assert_eq!(parse_message_list(raw), vec![0, 2]);
    }

    #[test]
    fn listing_keeps_negative_indices_and_skips_garbage() {
        let raw = "+CMGL: -1,\"REC READ\"\r\n+CMGL: xx,\r\n+CMGL: 7\r\nOK";
        assert_eq!(parse_message_list(raw), vec![-1]);
        assert!(parse_message_list("ERROR").is_empty());
    }

    #[test]
    fn single_message_plain_text() {
        let raw = "\r\n+CMGR: \"REC UNREAD\",\"+61412345678\",,\"25/10/25,19:33:13+44\"\r\nHello\r\n\r\nOK\r\n";
        let msg = parse_single_message(raw).expect("parsed");
        assert_eq!(msg.status, "REC UNREAD");
        assert_eq!(msg.sender, "+61412345678");
        assert_eq!(msg.text, "Hello");
        let ts = msg.timestamp.expect("timestamp");
        assert_eq!((ts.year(), ts.month(), ts.day()), (2025, 10, 25));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (19, 33, 13));
    }

    #[test]
    fn single_message_ucs2_multiline_and_quoted() {
        let raw = "+CMGR: \"REC READ\",\"002B00360031\",\"\",\"25/01/02,03:04:05-08\"\r\n\"4F60597D\r\n0021\"\r\nOK\r\n";
        let msg = parse_single_message(raw).expect("parsed");
        assert_eq!(msg.sender, "+61");
        assert_eq!(msg.text, "你好!");
    }

    #[test]
    fn hex_looking_text_from_plain_sender_stays_plain() {
        for word in ["cafe", "Face", "bead", "beefcafe", "00480069"] {
            let raw = format!(
                "+CMGR: \"REC UNREAD\",\"+61412345678\",,\"25/10/25,19:33:13+44\"\r\n{}\r\nOK\r\n",
                word
            );
            let msg = parse_single_message(&raw).expect("parsed");
            assert_eq!(msg.text, word);
        }
    }

    #[test]
    fn single_message_without_timestamp_shape() {
        let raw = "+CMGR: \"REC READ\",\"+4912345\"\r\nno date\r\nOK\r\n";
        let msg = parse_single_message(raw).expect("parsed");
        assert_eq!(msg.text, "no date");
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn single_message_requires_ok_and_header() {
        assert!(parse_single_message("+CMGR: \"REC READ\",\"+1\",,\"x\"\r\nhalf").is_none());
        assert!(parse_single_message("\r\n+CMS ERROR: 321\r\n").is_none());
        assert!(parse_single_message("+CMGR: garbled\r\nOK").is_none());
    }

    #[test]
    fn ucs2_heuristics() {
        assert_eq!(decode_ucs2_or_plain("00480069"), "Hi");
        assert_eq!(decode_ucs2_or_plain("Hello"), "Hello");
        assert_eq!(decode_ucs2_or_plain("2024"), "2024");
        assert_eq!(decode_ucs2_or_plain("+61412345678"), "+61412345678");
        assert_eq!(decode_ucs2_or_plain("0001"), "0001");
        assert_eq!(decode_ucs2_or_plain("D800"), "D800");
    }

    #[test]
    fn timestamp_strips_zone_and_rejects_garbage() {
        let ts = parse_timestamp("24/02/29,23:59:58+32").expect("valid");
        assert_eq!((ts.month(), ts.day(), ts.second()), (2, 29, 58));
        assert!(parse_timestamp("24/02/29,23:59:58").is_some());
        assert!(parse_timestamp("not a date").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn registration_short_form() {
        let reg = parse_registration("\r\n+CREG: 1,5\r\n\r\nOK\r\n").expect("parsed");
        assert_eq!(reg.status, 5);
        assert_eq!(reg.lac, None);
        assert_eq!(reg.ci, None);
        assert_eq!(reg.act, None);
        assert_eq!(reg.status_text(), "Registered (roaming)");
        assert_eq!(reg.act_text(), None);
    }

    #[test]
    fn registration_long_form() {
        let reg = parse_registration("+CREG: 2,1,\"1A2B\",\"3C4D\",7\r\nOK").expect("parsed");
        assert_eq!(reg.mode, 2);
        assert_eq!(reg.status, 1);
        assert_eq!(reg.lac.as_deref(), Some("1A2B"));
        assert_eq!(reg.ci.as_deref(), Some("3C4D"));
        assert_eq!(reg.act, Some(7));
        assert_eq!(reg.act_text().as_deref(), Some("E-UTRAN (LTE)"));
        assert!(reg.is_registered());
    }

    #[test]
    fn registration_unknown_codes_render() {
        let reg = parse_registration("+CREG: 2,42,\"0001\",\"0002\",12").expect("parsed");
        assert_eq!(reg.status_text(), "Unknown (42)");
        assert_eq!(reg.act_text().as_deref(), Some("Unknown (12)"));
        assert!(parse_registration("+CREG: 5").is_none());
        assert!(parse_registration("OK").is_none());
    }

    #[test]
    fn signal_scaling() {
        assert_eq!(parse_signal_quality("+CSQ: 31,0\r\nOK"), Some(SignalQuality::Percent(100)));
        assert_eq!(parse_signal_quality("+CSQ: 0,0"), Some(SignalQuality::Percent(0)));
        assert_eq!(parse_signal_quality("+CSQ: 99,99"), Some(SignalQuality::Unknown));
        assert_eq!(parse_signal_quality("+CSQ: 15,99"), Some(SignalQuality::Percent(48)));
        assert_eq!(parse_signal_quality("+CSQ: 45,99"), Some(SignalQuality::Unknown));
        assert_eq!(parse_signal_quality("ERROR"), None);
        assert_eq!(SignalQuality::Unknown.to_string(), "N/A");
    }

    #[test]
    fn call_list_incoming_only() {
        let raw = "+CLCC: 1,0,0,0,0,\"+100\",145\r\n+CLCC: 2,1,4,0,0,\"+61412345678\",145\r\nOK";
        let calls = parse_call_list(raw);
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.id, 2);
        assert_eq!(call.status, CallStatus::Incoming);
        assert_eq!(call.mode, CallMode::Voice);
        assert!(!call.multiparty);
        assert_eq!(call.number.as_deref(), Some("+61412345678"));
        assert_eq!(call.number_type, Some(145));
    }

    #[test]
    fn call_list_without_number() {
        let calls = parse_call_list("+CLCC: 1,1,4,9,0\r\nOK");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].number, None);
        assert_eq!(calls[0].mode, CallMode::Unknown);
        let calls = parse_call_list("+CLCC: 1,1,5,1,1,\"\",129");
        assert_eq!(calls[0].number, None);
        assert_eq!(calls[0].status, CallStatus::Waiting);
        assert!(calls[0].multiparty);
    }

    #[test]
    fn storage_count_named_and_unnamed() {
        let named = "+CPMS: \"SM\",1,30,\"ME\",2,10,\"ME\",2,10\r\nOK";
        assert_eq!(
            parse_storage_count(named, "ME"),
            Some(StorageCount { used: 2, total: 10 })
        );
        assert_eq!(
            parse_storage_count(named, "SM"),
            Some(StorageCount { used: 1, total: 30 })
        );
        assert_eq!(
            parse_storage_count("+CPMS: 3,50,3,50,3,50\r\nOK", "ME"),
            Some(StorageCount { used: 3, total: 50 })
        );
        assert_eq!(parse_storage_count("+CMS ERROR: 302", "ME"), None);
    }
}
