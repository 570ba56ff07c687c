//! Scripted stages shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::Int64Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use blockline_connectors::{Extractor, Loader};
use blockline_engine::config::resolve_document;
use blockline_types::{ConnectorError, DataBlock, InitMetadata, Payload, PipelineConfig};
use bytes::Bytes;
use serde_json::{json, Value};

/// A valid pipeline whose stages are replaced by the test.
pub fn config(mode: &str, extra: Value) -> PipelineConfig {
    let local = json!({"type": "objectStorage", "config": {"provider": "local", "root": "/unused"}});
    let mut raw = json!({
        "version": "1.0",
        "extConfig": {"type": "objectStorage", "config": {"connConfig": local, "bucketName": "raw", "fileType": "csv"}},
        "loaderConfig": {"type": "objectStorage", "config": {"connConfig": local, "bucketName": "out"}},
        "transferMode": mode,
        "resources": {"queueCapacity": 4, "pollIntervalMs": 10}
    });
    if let (Value::Object(base), Value::Object(extra)) = (&mut raw, extra) {
        base.extend(extra);
    }
    resolve_document(raw).expect("test config resolves").config
}

pub fn table(values: &[i64]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]));
    RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values.to_vec()))]).unwrap()
}

pub fn table_block(values: &[i64]) -> DataBlock {
    DataBlock::new(Payload::Table(table(values)), None)
}

pub fn file_block(body: &str) -> DataBlock {
    DataBlock::new(Payload::Files(vec![Bytes::from(body.to_string())]), None)
}

/// One scripted step of an extractor.
pub enum Step {
    Blocks(Vec<DataBlock>),
    Fail(&'static str),
}

/// Replays `steps` in order; calls past the end fail.
pub struct ScriptedExtractor {
    steps: Vec<Step>,
    pub calls: Arc<AtomicUsize>,
    copy_file: bool,
}

impl ScriptedExtractor {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            calls: Arc::new(AtomicUsize::new(0)),
            copy_file: true,
        }
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn type_tag(&self) -> &'static str {
        "scripted"
    }

    fn is_compatible_with_copy_file(&self) -> bool {
        self.copy_file
    }

    async fn extract(&mut self, _init: &InitMetadata) -> Result<Vec<DataBlock>, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.steps.is_empty() {
            return Err(ConnectorError::extract("script exhausted"));
        }
        match self.steps.remove(0) {
            Step::Blocks(blocks) => Ok(blocks),
            Step::Fail(msg) => Err(ConnectorError::extract(msg)),
        }
    }
}

/// Yields one single-row table block per call, forever.
pub struct Endless {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Extractor for Endless {
    fn type_tag(&self) -> &'static str {
        "endless"
    }

    fn is_compatible_with_copy_file(&self) -> bool {
        true
    }

    async fn extract(&mut self, _init: &InitMetadata) -> Result<Vec<DataBlock>, ConnectorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![table_block(&[n as i64])])
    }
}

/// What a [`RecordingLoader`] saw.
#[derive(Debug, Clone)]
pub struct Pushed {
    pub is_end: bool,
    pub rows: usize,
    pub files: Vec<Bytes>,
}

#[derive(Clone, Default)]
pub struct RecordingLoader {
    pub pushed: Arc<Mutex<Vec<Pushed>>>,
    pub fail_on: Option<usize>,
    pub delay: Option<Duration>,
    pub copy_file: bool,
}

impl RecordingLoader {
    pub fn new() -> Self {
        Self {
            copy_file: true,
            ..Self::default()
        }
    }

    pub fn pushed(&self) -> Vec<Pushed> {
        self.pushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Loader for RecordingLoader {
    fn type_tag(&self) -> &'static str {
        "recording"
    }

    fn is_compatible_with_copy_file(&self) -> bool {
        self.copy_file
    }

    async fn push(&mut self, block: &DataBlock) -> Result<(), ConnectorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut pushed = self.pushed.lock().unwrap();
        if self.fail_on == Some(pushed.len() + 1) {
            return Err(ConnectorError::load(format!("push {} rejected", pushed.len() + 1)));
        }
        let files = match &block.data {
            Payload::Files(files) => files.clone(),
            Payload::Table(_) => Vec::new(),
        };
        pushed.push(Pushed {
            is_end: block.is_end,
            rows: block.data.num_rows(),
            files,
        });
        Ok(())
    }
}
