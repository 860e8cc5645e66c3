// Copyright 2024-2025 Irreducible Inc.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;

use linear_map::LinearMap;

use crate::correlation::ExternalId;
use crate::record::{
    api_name, ApiCallRecord, ApiGroup, DeviceSyncRecord, DeviceUuid, OverheadRecord, SymbolId,
    ViewKind, ViewKindSet,
};
use crate::sink::{DeviceOperation, EventSink};
use crate::symbols::SymbolTable;

/// CsvSink
/// Writes one row per event, for offline analysis. Rows are formatted on the producing
/// thread and written by a background thread.
///
/// example output
/// ```bash
/// kind,correlation_id,name,thread_id,start_ns,end_ns,duration_ns,metadata
/// DriverApiCall,1,zeCommandListAppendLaunchKernel,4711,1200,1450,250,{"return_code":"0"}
/// Kernel,1,"vector_add",4711,2000,3000,1000,{"queue":"0x10"; "device":"0707..."; "append_ns":"1300"; "submit_ns":"1300"}
/// ```
/// The metadata column is a json object with `;` instead of `,`, so pandas keeps it in one
/// column.
pub struct CsvSink {
    kinds: ViewKindSet,
    symbols: Arc<SymbolTable>,
    tx: mpsc::Sender<Message>,
}

enum Message {
    Row(String),
    Flush(mpsc::Sender<()>),
}

impl CsvSink {
    /// Creates `output_file` and starts the writer thread. Names are resolved through
    /// `symbols`, usually the handler context's table.
    pub fn new<P: AsRef<Path>>(
        output_file: P,
        symbols: Arc<SymbolTable>,
        kinds: ViewKindSet,
    ) -> io::Result<Self> {
        let file = File::create(output_file)?;
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("gpu-view-csv".into())
            .spawn(move || write_rows(BufWriter::new(file), rx))?;

        Ok(Self {
            kinds,
            symbols,
            tx,
        })
    }

    /// Blocks until every row sent so far reached the file.
    pub fn flush(&self) {
        let (ack, done) = mpsc::channel();
        if self.tx.send(Message::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }

    fn send(&self, row: Row) {
        // the writer only goes away after an io error, which it already reported
        let _ = self.tx.send(Message::Row(format!("{row}\n")));
    }

    fn name(&self, id: SymbolId) -> String {
        self.symbols
            .resolve(id)
            .map_or_else(|| "unknown".to_string(), |name| name.to_string())
    }
}

fn write_rows(mut out: BufWriter<File>, rx: mpsc::Receiver<Message>) {
    if let Err(e) = out.write_all(Row::header().as_bytes()) {
        tracing::warn!("csv sink: failed to write the header: {e}");
        return;
    }

    while let Ok(message) = rx.recv() {
        match message {
            Message::Row(row) => {
                if let Err(e) = out.write_all(row.as_bytes()) {
                    tracing::warn!("csv sink: write failed, no more rows are written: {e}");
                    return;
                }
            }
            Message::Flush(ack) => {
                if let Err(e) = out.flush() {
                    tracing::warn!("csv sink: flush failed: {e}");
                }
                let _ = ack.send(());
            }
        }
    }

    if let Err(e) = out.flush().and_then(|_| out.get_ref().sync_all()) {
        tracing::warn!("csv sink: failed to sync the output file: {e}");
    }
}

fn hex_uuid(uuid: &DeviceUuid) -> String {
    uuid.iter().map(|b| format!("{b:02x}")).collect()
}

impl EventSink for CsvSink {
    fn wants(&self, kind: ViewKind) -> bool {
        self.kinds.contains(kind)
    }

    fn on_external_correlation(&self, correlation_id: u64, external: &[ExternalId]) {
        for id in external {
            let mut fields = LinearMap::new();
            fields.insert("external_id", id.id.to_string());
            self.send(Row {
                kind: ViewKind::ExternalCorrelation,
                correlation_id,
                name: format!("{:?}", id.kind),
                thread_id: 0,
                start_ns: 0,
                end_ns: 0,
                fields,
            });
        }
    }

    fn on_api_call(&self, call: &ApiCallRecord) {
        let mut fields = LinearMap::new();
        fields.insert("return_code", call.return_code.to_string());
        self.send(Row {
            kind: call.header.kind(),
            correlation_id: call.correlation_id,
            name: call.name().unwrap_or("unknown").to_string(),
            thread_id: call.thread_id,
            start_ns: call.start_timestamp,
            end_ns: call.end_timestamp,
            fields,
        });
    }

    fn on_device_operation(&self, operation: &DeviceOperation) {
        let mut fields = LinearMap::new();
        fields.insert("queue", format!("{:#x}", operation.queue_id()));
        let thread_id = match operation {
            DeviceOperation::Kernel(r) => {
                fields.insert("device", hex_uuid(&r.device_uuid));
                if r.sycl_node_id != 0 {
                    fields.insert("sycl_node", r.sycl_node_id.to_string());
                }
                r.thread_id
            }
            DeviceOperation::MemoryCopy(r) => {
                fields.insert("device", hex_uuid(&r.device_uuid));
                fields.insert("type", r.memcpy_type.to_string());
                r.thread_id
            }
            DeviceOperation::MemoryCopyP2p(r) => {
                fields.insert("src_device", hex_uuid(&r.src_device_uuid));
                fields.insert("dst_device", hex_uuid(&r.dst_device_uuid));
                fields.insert("type", r.memcpy_type.to_string());
                r.thread_id
            }
            DeviceOperation::MemoryFill(r) => {
                fields.insert("device", hex_uuid(&r.device_uuid));
                fields.insert("pattern_size", r.pattern_size.to_string());
                r.thread_id
            }
        };
        if operation.bytes() > 0 {
            fields.insert("bytes", operation.bytes().to_string());
        }
        let [append, submit, start, end] = operation.timestamps();
        fields.insert("append_ns", append.to_string());
        fields.insert("submit_ns", submit.to_string());

        self.send(Row {
            kind: operation.kind(),
            correlation_id: operation.correlation_id(),
            name: self.name(operation.name()),
            thread_id,
            start_ns: start,
            end_ns: end,
            fields,
        });
    }

    fn on_synchronization(&self, sync: &DeviceSyncRecord) {
        let mut fields = LinearMap::new();
        if sync.event_handle != 0 {
            fields.insert("event", format!("{:#x}", sync.event_handle));
        }
        if sync.queue_handle != 0 {
            fields.insert("queue", format!("{:#x}", sync.queue_handle));
        }
        fields.insert("return_code", sync.return_code.to_string());
        self.send(Row {
            kind: ViewKind::DeviceSynchronization,
            correlation_id: sync.correlation_id,
            name: format!("{:?}", sync.sync_type()),
            thread_id: sync.thread_id,
            start_ns: sync.start_timestamp,
            end_ns: sync.end_timestamp,
            fields,
        });
    }

    fn on_overhead(&self, overhead: &OverheadRecord) {
        let mut fields = LinearMap::new();
        fields.insert("count", overhead.count.to_string());
        let name = api_name(ApiGroup::from_raw(overhead.api_group), overhead.api_id);
        self.send(Row {
            kind: ViewKind::CollectionOverhead,
            correlation_id: 0,
            name: name.unwrap_or("unknown").to_string(),
            thread_id: overhead.thread_id,
            start_ns: overhead.start_timestamp,
            end_ns: overhead.end_timestamp,
            fields,
        });
    }
}

#[derive(Debug)]
struct Row {
    kind: ViewKind,
    correlation_id: u64,
    name: String,
    thread_id: u32,
    start_ns: u64,
    end_ns: u64,
    fields: LinearMap<&'static str, String>,
}

impl Row {
    fn header<'a>() -> &'a str {
        "kind,correlation_id,name,thread_id,start_ns,end_ns,duration_ns,metadata\n"
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kv: Vec<_> = self
            .fields
            .iter()
            .map(|(k, v)| format!("\"{k}\":\"{v}\""))
            .collect();
        let fields = format!("{{{}}}", kv.join("; "));
        // kernel names are demangled c++ and may contain commas
        let name = if self.name.contains([',', '"']) {
            format!("\"{}\"", self.name.replace('"', "\"\""))
        } else {
            self.name.clone()
        };
        write!(
            f,
            "{:?},{},{},{},{},{},{},{}",
            self.kind,
            self.correlation_id,
            name,
            self.thread_id,
            self.start_ns,
            self.end_ns,
            self.end_ns.saturating_sub(self.start_ns),
            fields
        )
    }
}
