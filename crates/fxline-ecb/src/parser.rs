//! SDMX-ML generic data parser using quick-xml
//!
//! Only the observation level is read:
//!
//! ```xml
//! <generic:Obs>
//!   <generic:ObsDimension value="2023-06-15"/>
//!   <generic:ObsValue value="1.0875"/>
//! </generic:Obs>
//! ```
//!
//! Namespace prefixes vary between responses, so elements are matched by
//! local name.

use chrono::NaiveDate;
use fxline_core::{DailySeries, FetchError};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Parse every observation in a generic data message.
///
/// Observations without a value, or with `NaN` (no fixing that day), are
/// skipped. A malformed date or number fails the whole payload.
pub fn parse_generic_data(xml: &str) -> Result<DailySeries, FetchError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut series = DailySeries::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"Obs" => {
                if let Some((date, value)) = parse_obs(&mut reader)? {
                    series.insert(date, value);
                }
            }
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"Error" => {
                return Err(FetchError::parse(read_error_message(&mut reader)?));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(FetchError::parse(format!("XML parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok(series)
}

/// Parse one `<Obs>` block.
fn parse_obs(reader: &mut Reader<&[u8]>) -> Result<Option<(NaiveDate, f64)>, FetchError> {
    let mut date = None;
    let mut value = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Empty(e) | Event::Start(e) => match e.local_name().as_ref() {
                b"ObsDimension" => date = value_attr(&e)?,
                b"ObsValue" => value = value_attr(&e)?,
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"Obs" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let Some(date) = date else {
        return Err(FetchError::parse("observation without date"));
    };
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|e| FetchError::parse(format!("bad observation date {date:?}: {e}")))?;

    let Some(value) = value else {
        log::debug!("ECB: no value for {date}");
        return Ok(None);
    };
    let value: f64 = value
        .parse()
        .map_err(|e| FetchError::parse(format!("bad value {value:?} for {date}: {e}")))?;
    if !value.is_finite() {
        log::debug!("ECB: non-numeric value for {date}");
        return Ok(None);
    }
    Ok(Some((date, value)))
}

fn value_attr(e: &BytesStart) -> Result<Option<String>, FetchError> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"value" {
            let v = attr.unescape_value().map_err(xml_error)?;
            return Ok(Some(v.trim().to_string()));
        }
    }
    Ok(None)
}

/// Text of an SDMX `<Error>` message, e.g. for an unknown series key.
fn read_error_message(reader: &mut Reader<&[u8]>) -> Result<String, FetchError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut depth = 1;

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Text(e) => {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&e.unescape().map_err(xml_error)?);
            }
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(if text.is_empty() {
        "upstream returned an error message".to_string()
    } else {
        text
    })
}

fn xml_error(e: impl std::fmt::Display) -> FetchError {
    FetchError::parse(format!("XML parse error: {e}"))
}
