//! Tabular data conversion between CSV, JSON, YAML and XML records

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use async_trait::async_trait;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::{Map, Number, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::cancel::{Cancellable, Staged, ensure_live};
use super::traits::{ConversionError, Converter};
use crate::formats::normalize_extension;

type Record = Map<String, Value>;

/// Element names used when writing XML records
const XML_ROOT: &str = "data";
const XML_ROW: &str = "row";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataFormat {
    Csv,
    Json,
    Yaml,
    Xml,
}

impl DataFormat {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy();
        match normalize_extension(&ext).as_str() {
            ".csv" => Some(DataFormat::Csv),
            ".json" => Some(DataFormat::Json),
            ".yaml" | ".yml" => Some(DataFormat::Yaml),
            ".xml" => Some(DataFormat::Xml),
            _ => None,
        }
    }
}

/// Converts record-oriented data in-process
#[derive(Debug, Clone, Default)]
pub struct DataHandler;

impl DataHandler {
    pub fn new() -> Self {
        Self
    }
}

fn processing(stage: &str, err: impl std::fmt::Display) -> ConversionError {
    ConversionError::Processing(format!("{stage}: {err}"))
}

/// Best-effort typing of a CSV or XML cell
fn infer_cell(raw: &str) -> Value {
    let cell = raw.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = cell.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = cell.parse::<f64>() {
        if let Some(number) = Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    match cell {
        "true" | "True" | "TRUE" => Value::Bool(true),
        "false" | "False" | "FALSE" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

fn read_csv<R: Read>(
    source: R,
    cancel: &CancellationToken,
) -> Result<Vec<Record>, ConversionError> {
    let mut reader = csv::Reader::from_reader(source);
    let headers = reader
        .headers()
        .map_err(|e| processing("read csv", e))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        ensure_live(cancel)?;
        let row = row.map_err(|e| processing("read csv", e))?;
        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(header, cell)| (header.to_string(), infer_cell(cell)))
            .collect();
        records.push(record);
    }
    Ok(records)
}

fn element_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn row_attributes(start: &BytesStart<'_>) -> Result<Record, ConversionError> {
    let mut record = Record::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| processing("read xml", e))?;
        let value = attr
            .unescape_value()
            .map_err(|e| processing("read xml", e))?;
        record.insert(element_name(attr.key.as_ref()), infer_cell(&value));
    }
    Ok(record)
}

/// Rows are the root's children; a row's attributes and child elements are
/// its fields. Anything nested below a field is ignored.
fn read_xml<R: BufRead>(
    source: R,
    cancel: &CancellationToken,
) -> Result<Vec<Record>, ConversionError> {
    let mut reader = quick_xml::Reader::from_reader(source);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut record = Record::new();
    let mut field: Option<(String, String)> = None;
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| processing("read xml", e))?;
        match event {
            Event::Start(start) => {
                match depth {
                    1 => {
                        ensure_live(cancel)?;
                        record = row_attributes(&start)?;
                    }
                    2 => field = Some((element_name(start.name().as_ref()), String::new())),
                    _ => {}
                }
                depth += 1;
            }
            Event::Empty(start) => match depth {
                1 => {
                    ensure_live(cancel)?;
                    records.push(row_attributes(&start)?);
                }
                2 => {
                    record.insert(element_name(start.name().as_ref()), Value::Null);
                }
                _ => {}
            },
            Event::Text(text) if depth == 3 => {
                if let Some((_, value)) = field.as_mut() {
                    value.push_str(&text.unescape().map_err(|e| processing("read xml", e))?);
                }
            }
            Event::CData(data) if depth == 3 => {
                if let Some((_, value)) = field.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                match depth {
                    2 => {
                        if let Some((name, value)) = field.take() {
                            record.insert(name, infer_cell(&value));
                        }
                    }
                    1 => records.push(std::mem::take(&mut record)),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

fn into_records(value: Value) -> Result<Vec<Record>, ConversionError> {
    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(record) => return Ok(vec![record]),
        other => {
            return Err(processing(
                "records",
                format!("expected a list of records, found {}", kind(&other)),
            ));
        }
    };

    rows.into_iter()
        .map(|row| match row {
            Value::Object(record) => Ok(record),
            other => Err(processing(
                "records",
                format!("expected a record, found {}", kind(&other)),
            )),
        })
        .collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn read_records(
    format: DataFormat,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<Record>, ConversionError> {
    let reader = BufReader::new(Cancellable::new(File::open(path)?, cancel));
    match format {
        DataFormat::Csv => read_csv(reader, cancel),
        DataFormat::Xml => read_xml(reader, cancel),
        DataFormat::Json => {
            let value: Value =
                serde_json::from_reader(reader).map_err(|e| processing("read json", e))?;
            into_records(value)
        }
        DataFormat::Yaml => {
            let value: Value =
                serde_yaml::from_reader(reader).map_err(|e| processing("read yaml", e))?;
            into_records(value)
        }
    }
}

/// Column order: keys in first-seen order across all records
fn columns(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Field name as an XML element name
fn xml_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !name.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}

fn xml_write_error(err: impl std::fmt::Display) -> ConversionError {
    processing("write xml", err)
}

fn write_xml<W: Write>(
    sink: W,
    records: &[Record],
    cancel: &CancellationToken,
) -> Result<(), ConversionError> {
    let mut xml = quick_xml::Writer::new_with_indent(sink, b' ', 2);

    xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(xml_write_error)?;
    xml.write_event(Event::Start(BytesStart::new(XML_ROOT)))
        .map_err(xml_write_error)?;

    for record in records {
        ensure_live(cancel)?;
        xml.write_event(Event::Start(BytesStart::new(XML_ROW)))
            .map_err(xml_write_error)?;
        for (key, value) in record {
            let name = xml_name(key);
            match value {
                Value::Null => xml
                    .write_event(Event::Empty(BytesStart::new(name.as_str())))
                    .map_err(xml_write_error)?,
                value => {
                    let text = csv_cell(Some(value));
                    xml.write_event(Event::Start(BytesStart::new(name.as_str())))
                        .map_err(xml_write_error)?;
                    xml.write_event(Event::Text(BytesText::new(&text)))
                        .map_err(xml_write_error)?;
                    xml.write_event(Event::End(BytesEnd::new(name.as_str())))
                        .map_err(xml_write_error)?;
                }
            }
        }
        xml.write_event(Event::End(BytesEnd::new(XML_ROW)))
            .map_err(xml_write_error)?;
    }

    xml.write_event(Event::End(BytesEnd::new(XML_ROOT)))
        .map_err(xml_write_error)?;
    xml.into_inner().write_all(b"\n")?;
    Ok(())
}

fn write_records<W: Write>(
    format: DataFormat,
    records: &[Record],
    mut writer: W,
    cancel: &CancellationToken,
) -> Result<(), ConversionError> {
    match format {
        DataFormat::Csv => {
            let columns = columns(records);
            let mut csv = csv::Writer::from_writer(&mut writer);
            csv.write_record(&columns)
                .map_err(|e| processing("write csv", e))?;
            for record in records {
                ensure_live(cancel)?;
                csv.write_record(columns.iter().map(|c| csv_cell(record.get(c))))
                    .map_err(|e| processing("write csv", e))?;
            }
            csv.flush()?;
        }
        DataFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, records)
                .map_err(|e| processing("write json", e))?;
            writer.write_all(b"\n")?;
        }
        DataFormat::Yaml => {
            serde_yaml::to_writer(&mut writer, records)
                .map_err(|e| processing("write yaml", e))?;
        }
        DataFormat::Xml => write_xml(&mut writer, records, cancel)?,
    }

    writer.flush()?;
    Ok(())
}

fn convert_blocking(
    input: &Path,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<usize, ConversionError> {
    let unsupported = || ConversionError::UnsupportedPair {
        category: "data",
        input: input.display().to_string(),
        output: output.display().to_string(),
    };
    let source = DataFormat::from_path(input).ok_or_else(unsupported)?;
    let target = DataFormat::from_path(output).ok_or_else(unsupported)?;
    ensure_live(cancel)?;

    let records = read_records(source, input, cancel)?;

    let staged = Staged::next_to(output)?;
    let writer = BufWriter::new(Cancellable::new(staged.as_file(), cancel));
    write_records(target, &records, writer, cancel)?;
    staged.persist(output, cancel)?;
    Ok(records.len())
}

#[async_trait]
impl Converter for DataHandler {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError> {
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        let token = cancel.clone();
        let records =
            tokio::task::spawn_blocking(move || convert_blocking(&input, &output, &token))
                .await??;
        debug!(records, "Data converted");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "data"
    }
}
