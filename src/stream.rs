//! stream — ordered, nested event stream (JSON Lines).
//!
//! One event per line:
//!   {"ev":"open","name":"activity"}
//!   {"ev":"data","fields":{"id":4,"module":"quiz"}}
//!   {"ev":"close","name":"activity"}
//!
//! Every emitted record is open, optional data (elements with final fields
//! only), its children, close. Paths are the slash-joined chain of open
//! element names: "/course/activities/activity".

use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

use crate::error::StructuralError;
use crate::record::Record;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ev", rename_all = "snake_case")]
pub enum StreamEvent {
    Open { name: String },
    Data { fields: Record },
    Close { name: String },
}

/// Receiver of backup output.
pub trait EventSink {
    fn open(&mut self, name: &str) -> Result<(), StructuralError>;
    fn data(&mut self, fields: &Record) -> Result<(), StructuralError>;
    fn close(&mut self, name: &str) -> Result<(), StructuralError>;
}

/// JSONL writer over any io::Write.
pub struct StreamWriter<W: Write> {
    out: W,
    open: Vec<String>,
    records: u64,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            open: Vec::new(),
            records: 0,
        }
    }

    fn write_event(&mut self, ev: &StreamEvent) -> Result<(), StructuralError> {
        serde_json::to_writer(&mut self.out, ev)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Number of data events written.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flush and hand back the inner writer. Fails if elements are still open.
    pub fn finish(mut self) -> Result<W, StructuralError> {
        if let Some(name) = self.open.last() {
            return Err(StructuralError::Stream(format!(
                "element '{}' left open at end of stream",
                name
            )));
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> EventSink for StreamWriter<W> {
    fn open(&mut self, name: &str) -> Result<(), StructuralError> {
        self.open.push(name.to_string());
        self.write_event(&StreamEvent::Open {
            name: name.to_string(),
        })
    }

    fn data(&mut self, fields: &Record) -> Result<(), StructuralError> {
        if self.open.is_empty() {
            return Err(StructuralError::Stream("data outside of any element".to_string()));
        }
        self.records += 1;
        serde_json::to_writer(&mut self.out, &DataRef { ev: "data", fields })?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<(), StructuralError> {
        match self.open.pop() {
            Some(top) if top == name => self.write_event(&StreamEvent::Close {
                name: name.to_string(),
            }),
            top => Err(StructuralError::Stream(format!(
                "close '{}' does not match open '{}'",
                name,
                top.unwrap_or_default()
            ))),
        }
    }
}

// borrowed form of StreamEvent::Data (avoids cloning every record)
#[derive(Serialize)]
struct DataRef<'a> {
    ev: &'static str,
    fields: &'a Record,
}

/// Collects events in memory (tests, dry runs).
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<StreamEvent>,
}

impl EventSink for MemorySink {
    fn open(&mut self, name: &str) -> Result<(), StructuralError> {
        self.events.push(StreamEvent::Open {
            name: name.to_string(),
        });
        Ok(())
    }

    fn data(&mut self, fields: &Record) -> Result<(), StructuralError> {
        self.events.push(StreamEvent::Data {
            fields: fields.clone(),
        });
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<(), StructuralError> {
        self.events.push(StreamEvent::Close {
            name: name.to_string(),
        });
        Ok(())
    }
}

/// JSONL reader; blank lines are skipped.
pub struct StreamReader<R: BufRead> {
    input: R,
    line_no: usize,
    buf: String,
}

impl<R: BufRead> StreamReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line_no: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> Iterator for StreamReader<R> {
    type Item = Result<StreamEvent, StructuralError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.input.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            self.line_no += 1;
            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            return Some(serde_json::from_str::<StreamEvent>(line).map_err(|e| {
                StructuralError::Stream(format!("line {}: {}", self.line_no, e))
            }));
        }
    }
}

/// Adapts an event iterator into (path, record) pairs for data events,
/// validating open/close balance.
pub struct PathEvents<I> {
    events: I,
    stack: Vec<String>,
    finished: bool,
}

impl<I> PathEvents<I>
where
    I: Iterator<Item = Result<StreamEvent, StructuralError>>,
{
    pub fn new(events: I) -> Self {
        Self {
            events,
            stack: Vec::new(),
            finished: false,
        }
    }

    fn path(&self) -> String {
        let mut p = String::new();
        for n in &self.stack {
            p.push('/');
            p.push_str(n);
        }
        p
    }
}

impl<I> Iterator for PathEvents<I>
where
    I: Iterator<Item = Result<StreamEvent, StructuralError>>,
{
    type Item = Result<(String, Record), StructuralError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let ev = match self.events.next() {
                Some(Ok(ev)) => ev,
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    if let Some(open) = self.stack.last() {
                        return Some(Err(StructuralError::Stream(format!(
                            "unexpected end of stream inside '{}'",
                            open
                        ))));
                    }
                    debug!("stream: end of input");
                    return None;
                }
            };
            match ev {
                StreamEvent::Open { name } => self.stack.push(name),
                StreamEvent::Close { name } => match self.stack.pop() {
                    Some(top) if top == name => {}
                    top => {
                        self.finished = true;
                        return Some(Err(StructuralError::Stream(format!(
                            "close '{}' does not match open '{}'",
                            name,
                            top.unwrap_or_default()
                        ))));
                    }
                },
                StreamEvent::Data { fields } => {
                    if self.stack.is_empty() {
                        self.finished = true;
                        return Some(Err(StructuralError::Stream(
                            "data outside of any element".to_string(),
                        )));
                    }
                    return Some(Ok((self.path(), fields)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn writer_reader_paths() {
        let mut w = StreamWriter::new(Vec::new());
        w.open("course").unwrap();
        w.data(&Record::from_pairs([("id", 1)])).unwrap();
        w.open("activities").unwrap();
        w.open("activity").unwrap();
        w.data(&Record::from_pairs([("id", 10)])).unwrap();
        w.close("activity").unwrap();
        w.close("activities").unwrap();
        w.close("course").unwrap();
        assert_eq!(w.records(), 2);
        let bytes = w.finish().unwrap();

        let got: Vec<(String, Record)> = PathEvents::new(StreamReader::new(Cursor::new(bytes)))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0, "/course");
        assert_eq!(got[1].0, "/course/activities/activity");
        assert_eq!(got[1].1.id(), Some(10));
    }

    #[test]
    fn writer_rejects_mismatched_close() {
        let mut w = StreamWriter::new(Vec::new());
        w.open("a").unwrap();
        assert!(w.close("b").is_err());
    }

    #[test]
    fn reader_reports_unbalanced_input() {
        let input = "{\"ev\":\"open\",\"name\":\"a\"}\n{\"ev\":\"data\",\"fields\":{\"id\":1}}\n";
        let mut it = PathEvents::new(StreamReader::new(Cursor::new(input)));
        assert!(it.next().unwrap().is_ok());
        assert!(matches!(it.next(), Some(Err(StructuralError::Stream(_)))));
        assert!(it.next().is_none());
    }

    #[test]
    fn reader_reports_garbage_with_line_number() {
        let input = "\n{\"ev\":\"open\",\"name\":\"a\"}\nnot json\n";
        let mut it = StreamReader::new(Cursor::new(input));
        assert!(it.next().unwrap().is_ok());
        match it.next() {
            Some(Err(StructuralError::Stream(msg))) => assert!(msg.starts_with("line 3")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
