//! End-to-end runs of the probe / delay / process protocol.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clinicload::error::{ParseResult, SourceError};
use clinicload::materialize::HandlerRegistry;
use clinicload::models::{
    DataType, Entity, FieldRecord, FileFormat, ImportId, ImportStatus, LineKey, NewImport,
};
use clinicload::parser::{FieldStream, FormatParser, ReaderRegistry};
use clinicload::pipeline::{DispatchMessage, DispatchQueue, LocalQueue, Orchestrator, WorkerPool};
use clinicload::source::ObjectSource;
use clinicload::store::{ImportStore, MemoryStore};
use clinicload::{logging, ImportError, Settings};

const LOCATIONS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<locations>
  <location><code>26</code><name>Pernambuco</name><uf>PE</uf></location>
  <location><code>2611606</code><name>Recife</name></location>
  <location><code>2607901</code><name>Jaboatão dos Guararapes</name></location>
</locations>"#;

const ADMISSIONS: &str = "MSH|^~\\&|HIS|HOSP|||202401011200||ADT^A01|1|P|2.5\r\
                          PID|1||12345678909^^^SUS^CPF||Silva^Ana||19800212|F|||||81999990000\r\
                          PV1|1|I\r\
                          PID|1||98765432100||Souza^Joao||19751130|M\r";

/// Object that becomes reachable after a number of failed probes.
struct FlakySource {
    ready_after: Option<u32>,
    probes: AtomicU32,
    body: Vec<u8>,
}

impl FlakySource {
    fn new(ready_after: Option<u32>, body: impl AsRef<[u8]>) -> Arc<Self> {
        Arc::new(Self {
            ready_after,
            probes: AtomicU32::new(0),
            body: body.as_ref().to_vec(),
        })
    }

    fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectSource for FlakySource {
    async fn probe(&self, _location: &str) -> Result<bool, SourceError> {
        let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        match self.ready_after {
            Some(failures) if n > failures => Ok(true),
            Some(_) => Ok(false),
            None => Err(SourceError::Status(403)),
        }
    }

    async fn fetch(&self, _location: &str) -> Result<Vec<u8>, SourceError> {
        Ok(self.body.clone())
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    queue: LocalQueue,
    orchestrator: Arc<Orchestrator>,
    receiver: Option<tokio::sync::mpsc::UnboundedReceiver<DispatchMessage>>,
}

fn harness(source: Arc<FlakySource>, settings: Settings) -> Harness {
    harness_with(source, settings, |orchestrator| orchestrator)
}

fn harness_with(
    source: Arc<FlakySource>,
    settings: Settings,
    configure: impl FnOnce(Orchestrator) -> Orchestrator,
) -> Harness {
    logging::init_test();
    let store = Arc::new(MemoryStore::new());
    let (queue, receiver) = LocalQueue::new();
    let orchestrator = Arc::new(configure(Orchestrator::new(
        store.clone(),
        source,
        Arc::new(queue.clone()),
        settings,
    )));
    Harness {
        store,
        queue,
        orchestrator,
        receiver: Some(receiver),
    }
}

fn request(data_type: DataType, file_format: FileFormat, file_name: &str) -> NewImport {
    NewImport {
        data_type,
        file_format,
        file_name: file_name.into(),
        source_location: format!("https://storage.example/uploads/{}?sig=abc", file_name),
    }
}

async fn wait_until(store: &MemoryStore, id: i64, done: impl Fn(ImportStatus) -> bool) -> ImportStatus {
    for _ in 0..100_000 {
        let status = store.get_import(id).await.unwrap().status;
        if done(status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("import {} never reached the expected status", id);
}

async fn wait_terminal(store: &MemoryStore, id: i64) -> ImportStatus {
    wait_until(store, id, |status| status.is_terminal()).await
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_object_is_retried_until_ready() {
    let source = FlakySource::new(Some(2), LOCATIONS);
    let mut h = harness(source.clone(), Settings::default());
    let import = h
        .store
        .create_import(request(DataType::Location, FileFormat::Xml, "locations.xml"))
        .await
        .unwrap();

    let receiver = h.receiver.take().unwrap();
    let workers = WorkerPool::new(h.orchestrator.clone(), 2).spawn(receiver);
    h.queue.publish(DispatchMessage::initial(&import)).await.unwrap();

    let status = wait_terminal(&h.store, import.id).await;
    assert_eq!(status, ImportStatus::Succeeded);
    assert_eq!(source.probes(), 3);

    assert_eq!(
        h.store.status_history(import.id).await,
        vec![
            ImportStatus::Pending,
            ImportStatus::Probing,
            ImportStatus::Delayed,
            ImportStatus::Probing,
            ImportStatus::Delayed,
            ImportStatus::Probing,
            ImportStatus::Processing,
            ImportStatus::Succeeded,
        ]
    );

    let finished = h.store.get_import(import.id).await.unwrap();
    assert_eq!(finished.attempts, 3);

    let entities = h.store.entities(import.id).await.unwrap();
    let kinds: Vec<&str> = entities.iter().map(|e| e.entity.kind()).collect();
    assert_eq!(kinds, vec!["State", "Municipality", "Municipality"]);
    match &entities[1].entity {
        Entity::Municipality(m) => assert_eq!(m.state_code, 26),
        other => panic!("unexpected entity {:?}", other),
    }

    h.orchestrator.shutdown();
    workers.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retry_waits_for_the_configured_delay() {
    let source = FlakySource::new(Some(1), LOCATIONS);
    let settings = Settings {
        retry_delay: Duration::from_secs(30),
        ..Settings::default()
    };
    let mut h = harness(source.clone(), settings);
    let import = h
        .store
        .create_import(request(DataType::Location, FileFormat::Xml, "locations.xml"))
        .await
        .unwrap();
    let mut receiver = h.receiver.take().unwrap();

    let status = h
        .orchestrator
        .handle(DispatchMessage::initial(&import))
        .await
        .unwrap();
    assert_eq!(status, ImportStatus::Delayed);

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(receiver.try_recv().is_err());
    tokio::time::sleep(Duration::from_secs(2)).await;
    let redelivered = receiver.try_recv().unwrap();
    assert_eq!(redelivered.attempt, 1);

    let status = h.orchestrator.handle(redelivered).await.unwrap();
    assert_eq!(status, ImportStatus::Succeeded);
    assert_eq!(source.probes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_max_attempts_fails_the_import() {
    let source = FlakySource::new(None, LOCATIONS);
    let settings = Settings {
        max_attempts: Some(2),
        ..Settings::default()
    };
    let mut h = harness(source.clone(), settings);
    let import = h
        .store
        .create_import(request(DataType::Location, FileFormat::Xml, "locations.xml"))
        .await
        .unwrap();
    let mut receiver = h.receiver.take().unwrap();

    let first = h.orchestrator.handle(DispatchMessage::initial(&import)).await;
    assert!(matches!(first, Ok(ImportStatus::Delayed)));

    let retry = receiver.recv().await.unwrap();
    let second = h.orchestrator.handle(retry).await;
    assert!(matches!(
        second,
        Err(ImportError::TransientSourceUnavailable { attempts: 2, .. })
    ));

    let failed = h.store.get_import(import.id).await.unwrap();
    assert_eq!(failed.status, ImportStatus::Failed);
    assert_eq!(failed.failure_kind.as_deref(), Some("transient_source_unavailable"));
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let body = r#"<doctors>
        <doctor><crm>12345</crm><uf>SP</uf><name>Ana Lima</name></doctor>
        <doctor><crm>12</crm><uf>SP</uf><name>Too Short</name></doctor>
        <doctor><crm>67890</crm><uf>RJ</uf><name>Rui Costa</name><specialty>Cardiology</specialty></doctor>
    </doctors>"#;
    let source = FlakySource::new(Some(0), body);
    let h = harness(source, Settings::default());
    let import = h
        .store
        .create_import(request(DataType::Doctor, FileFormat::Xml, "doctors.xml"))
        .await
        .unwrap();
    let message = DispatchMessage::initial(&import);

    let first = h.orchestrator.handle(message.clone()).await.unwrap();
    let second = h.orchestrator.handle(message).await.unwrap();
    assert_eq!(first, ImportStatus::PartialSuccess);
    assert_eq!(second, ImportStatus::PartialSuccess);

    assert_eq!(h.store.count_entities(import.id).await.unwrap(), 2);
    let errors = h.store.line_errors(import.id).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].key.line, 2);
    assert_eq!(errors[0].value.as_deref(), Some("12"));
}

#[tokio::test]
async fn test_clinical_messages_become_patients() {
    let source = FlakySource::new(Some(0), ADMISSIONS);
    let h = harness(source, Settings::default());
    let import = h
        .store
        .create_import(request(DataType::ClinicalCode, FileFormat::Hl7, "adt.hl7"))
        .await
        .unwrap();

    let status = h
        .orchestrator
        .handle(DispatchMessage::initial(&import))
        .await
        .unwrap();
    assert_eq!(status, ImportStatus::Succeeded);

    let entities = h.store.entities(import.id).await.unwrap();
    assert_eq!(entities.len(), 2);
    assert_eq!(entities[0].line.line, 2);
    assert_eq!(entities[1].line.line, 4);
    match &entities[1].entity {
        Entity::Patient(p) => assert_eq!(p.name, "Joao Souza"),
        other => panic!("unexpected entity {:?}", other),
    }
}

#[tokio::test]
async fn test_truncated_source_keeps_earlier_lines() {
    let body = r#"<hospitals>
        <hospital><cnes>2337991</cnes><name>HR</name></hospital>
        <hospital><cnes>2399717</cnes><name>HGV</name></hospital>
        <hospital><cnes>0000001</cnes><name>Trun"#;
    let source = FlakySource::new(Some(0), body);
    let h = harness(source, Settings::default());
    let import = h
        .store
        .create_import(request(DataType::Hospital, FileFormat::Xml, "hospitals.xml"))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .handle(DispatchMessage::initial(&import))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "source_read_failure");

    let failed = h.store.get_import(import.id).await.unwrap();
    assert_eq!(failed.status, ImportStatus::Failed);
    assert_eq!(h.store.count_entities(import.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_shutdown_cancels_processing() {
    let source = FlakySource::new(Some(0), LOCATIONS);
    let h = harness(source, Settings::default());
    let import = h
        .store
        .create_import(request(DataType::Location, FileFormat::Xml, "locations.xml"))
        .await
        .unwrap();

    h.orchestrator.shutdown();
    let err = h
        .orchestrator
        .handle(DispatchMessage::initial(&import))
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::Cancelled));

    let failed = h.store.get_import(import.id).await.unwrap();
    assert_eq!(failed.failure_kind.as_deref(), Some("cancelled"));
    assert_eq!(h.store.count_entities(import.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unregistered_data_type_fails() {
    let source = FlakySource::new(Some(0), LOCATIONS);
    let store = Arc::new(MemoryStore::new());
    let (queue, _rx) = LocalQueue::new();
    let orchestrator = Orchestrator::new(store.clone(), source, Arc::new(queue), Settings::default())
        .with_handlers(HandlerRegistry::new());
    let import = store
        .create_import(request(DataType::Location, FileFormat::Xml, "locations.xml"))
        .await
        .unwrap();

    let err = orchestrator
        .handle(DispatchMessage::initial(&import))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "unsupported_data_type");
    assert_eq!(
        store.get_import(import.id).await.unwrap().status,
        ImportStatus::Failed
    );
}

/// Reader that spends `pause` on every record, standing in for a huge workbook.
struct SlowParser {
    records: u32,
    pause: Duration,
}

impl FormatParser for SlowParser {
    fn format(&self) -> FileFormat {
        FileFormat::Xml
    }

    fn parse<'a>(&self, import_id: ImportId, _bytes: &'a [u8]) -> ParseResult<FieldStream<'a>> {
        let pause = self.pause;
        Ok(Box::new((1..=self.records).filter_map(move |line| {
            std::thread::sleep(pause);
            FieldRecord::new(import_id, LineKey::line(line), "code", "2337991").map(Ok)
        })))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_import_does_not_hold_up_others() {
    let source = FlakySource::new(Some(0), ADMISSIONS);
    let mut readers = ReaderRegistry::with_defaults(Default::default());
    readers.register(SlowParser {
        records: 10,
        pause: Duration::from_millis(200),
    });
    let mut h = harness_with(source, Settings::default(), |o| o.with_readers(readers));

    let slow = h
        .store
        .create_import(request(DataType::Hospital, FileFormat::Xml, "hospitals.xml"))
        .await
        .unwrap();
    let fast = h
        .store
        .create_import(request(DataType::ClinicalCode, FileFormat::Hl7, "adt.hl7"))
        .await
        .unwrap();

    let receiver = h.receiver.take().unwrap();
    let workers = WorkerPool::new(h.orchestrator.clone(), 4).spawn(receiver);
    h.queue.publish(DispatchMessage::initial(&slow)).await.unwrap();
    wait_until(&h.store, slow.id, |status| status == ImportStatus::Processing).await;

    let started = Instant::now();
    h.queue.publish(DispatchMessage::initial(&fast)).await.unwrap();
    let status = wait_terminal(&h.store, fast.id).await;
    assert_eq!(status, ImportStatus::Succeeded);
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "fast import took {:?}",
        started.elapsed()
    );
    assert!(!h.store.get_import(slow.id).await.unwrap().status.is_terminal());

    assert!(wait_terminal(&h.store, slow.id).await.is_terminal());
    h.orchestrator.shutdown();
    workers.await.unwrap();
}

#[tokio::test]
async fn test_workbook_import_skips_header_rows() {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let first = workbook.add_worksheet();
    first.write_string(0, 0, "CNES").unwrap();
    first.write_string(0, 1, "Nome").unwrap();
    first.write_number(1, 0, 2337991).unwrap();
    first.write_string(1, 1, "Hospital da Restauração").unwrap();
    first.write_string(2, 0, "2399717").unwrap();
    first.write_string(2, 1, "HGV").unwrap();
    let second = workbook.add_worksheet();
    second.write_string(0, 0, "CNES").unwrap();
    second.write_string(0, 1, "Nome").unwrap();
    second.write_string(1, 0, "2304400").unwrap();
    second.write_string(1, 1, "HGF").unwrap();
    let body = workbook.save_to_buffer().unwrap();

    let source = FlakySource::new(Some(0), body);
    let h = harness(source, Settings::default());
    let import = h
        .store
        .create_import(request(DataType::Hospital, FileFormat::Xlsx, "hospitals.xlsx"))
        .await
        .unwrap();

    let status = h
        .orchestrator
        .handle(DispatchMessage::initial(&import))
        .await
        .unwrap();
    assert_eq!(status, ImportStatus::Succeeded);
    assert!(h.store.line_errors(import.id).await.unwrap().is_empty());

    let entities = h.store.entities(import.id).await.unwrap();
    let keys: Vec<LineKey> = entities.iter().map(|e| e.line).collect();
    assert_eq!(
        keys,
        vec![LineKey::new(1, 2), LineKey::new(1, 3), LineKey::new(2, 2)]
    );
    match &entities[0].entity {
        Entity::Hospital(hospital) => {
            assert_eq!(hospital.registry_code, "2337991");
            assert_eq!(hospital.name, "Hospital da Restauração");
        }
        other => panic!("unexpected entity {:?}", other),
    }
}
