//! File import flows: QFX parsing end to end, dedup on re-import, progress
//! event cadence.

use std::sync::Arc;

use ledgerlink_engine::{
	commands::{ImportFromFile, ImportFromFileHandler, ProgressPolicy},
	domain::CredentialType,
	events::{EventKind, EventPhase, RecordingBus},
	providers::{file::FileProvider, ProviderRegistry},
	store::{memory::MemoryStore, AccountStore, ConnectionStore, TransactionStore},
};
use uuid::Uuid;

fn qfx_statement(transaction_count: usize) -> String {
	let mut body = String::from(
		"OFXHEADER:100\nDATA:OFXSGML\nVERSION:102\n\n<OFX>\n<BANKMSGSRSV1>\n<STMTTRNRS>\n\
		 <STMTRS>\n<CURDEF>USD\n<BANKACCTFROM>\n<BANKID>071000013\n<ACCTID>000000987654321\n\
		 <ACCTTYPE>CHECKING\n</BANKACCTFROM>\n<BANKTRANLIST>\n",
	);
	for i in 0..transaction_count {
		body.push_str(&format!(
			"<STMTTRN>\n<TRNTYPE>DEBIT\n<DTPOSTED>20250615\n<TRNAMT>-{}.25\n\
			 <FITID>2025061500{i:03}\n<NAME>CARD PURCHASE {i}\n</STMTTRN>\n",
			10 + i
		));
	}
	body.push_str(
		"</BANKTRANLIST>\n<LEDGERBAL>\n<BALAMT>5000.00\n<DTASOF>20250630\n</LEDGERBAL>\n\
		 </STMTRS>\n</STMTTRNRS>\n</BANKMSGSRSV1>\n</OFX>\n",
	);
	body
}

struct Setup {
	store: Arc<MemoryStore>,
	bus: Arc<RecordingBus>,
	handler: ImportFromFileHandler,
	user_id: Uuid,
}

fn setup(policy: ProgressPolicy) -> Setup {
	let store = Arc::new(MemoryStore::new());
	let bus = Arc::new(RecordingBus::new());
	let mut registry = ProviderRegistry::new();
	registry.register("chase_file", Uuid::now_v7(), Arc::new(FileProvider::new()));
	let handler = ImportFromFileHandler::new(
		store.clone(),
		store.clone(),
		store.clone(),
		Arc::new(registry),
		bus.clone(),
		policy,
	);
	Setup { store, bus, handler, user_id: Uuid::now_v7() }
}

fn command(user_id: Uuid, content: &str) -> ImportFromFile {
	ImportFromFile {
		user_id,
		provider_slug: "chase_file".to_string(),
		file_name: "chase-2025-06.qfx".to_string(),
		file_format: "qfx".to_string(),
		file_content: content.as_bytes().to_vec(),
	}
}

// Scenario: re-importing the same QFX creates nothing new — every FITID is
// already present, and the single file-import connection is reused.
#[tokio::test]
async fn qfx_reimport_dedups_all_transactions() {
	let s = setup(ProgressPolicy::default());
	let statement = qfx_statement(25);

	let first = s.handler.handle(command(s.user_id, &statement)).await.unwrap();
	assert_eq!(first.accounts_created, 1);
	assert_eq!(first.transactions_created, 25);
	assert_eq!(first.transactions_skipped, 0);

	let second = s.handler.handle(command(s.user_id, &statement)).await.unwrap();
	assert_eq!(second.accounts_created, 0);
	assert_eq!(second.accounts_updated, 1);
	assert_eq!(second.transactions_created, 0);
	assert_eq!(second.transactions_skipped, 25);
	assert_eq!(second.connection_id, first.connection_id);

	// No duplicate rows.
	let accounts = AccountStore::find_by_connection_id(s.store.as_ref(), first.connection_id, false)
		.await
		.unwrap();
	assert_eq!(accounts.len(), 1);
	let transactions =
		TransactionStore::find_by_account_id(s.store.as_ref(), accounts[0].id, 100, 0)
			.await
			.unwrap();
	assert_eq!(transactions.len(), 25);
}

#[tokio::test]
async fn import_connection_holds_a_placeholder_credential() {
	let s = setup(ProgressPolicy::default());
	s.handler.handle(command(s.user_id, &qfx_statement(3))).await.unwrap();

	let connections =
		ConnectionStore::find_by_user_id(s.store.as_ref(), s.user_id).await.unwrap();
	assert_eq!(connections.len(), 1);
	let credentials = connections[0].credentials().unwrap();
	assert_eq!(credentials.credential_type(), CredentialType::FileImport);
	// The statement body itself is never persisted.
	assert_eq!(credentials.encrypted_data(), b"file_import_placeholder");
}

#[tokio::test]
async fn progress_events_fire_during_ingestion_but_not_for_the_final_record() {
	let s = setup(ProgressPolicy { record_interval: 100, percent_interval: 20 });
	s.handler.handle(command(s.user_id, &qfx_statement(200))).await.unwrap();

	let events = s.bus.events();
	assert_eq!(events[0].kind.phase(), EventPhase::Attempted);
	assert_eq!(events.last().unwrap().kind.phase(), EventPhase::Succeeded);

	let progress: Vec<(usize, usize, u8)> = events
		.iter()
		.filter_map(|event| match &event.kind {
			EventKind::FileImportProgress {
				records_processed,
				total_records,
				progress_percent,
				..
			} => Some((*records_processed, *total_records, *progress_percent)),
			_ => None,
		})
		.collect();
	assert!(!progress.is_empty());
	assert!(progress.iter().all(|(processed, total, _)| processed < total));
	// Percent markers are nondecreasing and cross the configured step.
	let percents: Vec<u8> = progress.iter().map(|(_, _, p)| *p).collect();
	let mut sorted = percents.clone();
	sorted.sort_unstable();
	assert_eq!(percents, sorted);
	assert_eq!(
		progress.iter().map(|(r, _, _)| *r).collect::<Vec<_>>(),
		vec![40, 80, 100, 140, 180]
	);
}

#[tokio::test]
async fn failed_import_emits_attempted_then_failed() {
	let s = setup(ProgressPolicy::default());
	let mut cmd = command(s.user_id, "this is not a statement");
	cmd.file_format = "qfx".to_string();
	assert!(s.handler.handle(cmd).await.is_err());
	assert_eq!(s.bus.phases(), vec![EventPhase::Attempted, EventPhase::Failed]);
	assert_eq!(s.bus.events()[1].kind.reason(), Some("invalid_file"));
}
