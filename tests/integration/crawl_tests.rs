//! Integration tests for the crawler
//!
//! These tests drive the coordinator end-to-end against a scripted
//! in-memory search page and check what ends up in the database.

mod support;

use haendler_scout::browser::ApiResponse;
use haendler_scout::config::Config;
use haendler_scout::crawler::{Coordinator, RunReport, LAST_API_FILE};
use haendler_scout::extract::RetailerRecord;
use haendler_scout::output::{export_json_lines, format_markdown_summary, load_statistics};
use haendler_scout::state::CrawlState;
use haendler_scout::storage::{RunStatus, SessionRecord, SqliteStorage, Storage};
use haendler_scout::{ConfigError, ScoutError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use support::{listing, results_page, test_config, ScriptedSite, SiteScript, SEARCH_FORM};

const HASH: &str = "test-config-hash";

async fn run_crawl(config: Config, site: &Arc<ScriptedSite>, fresh: bool) -> RunReport {
    let pages = Arc::clone(site) as Arc<dyn haendler_scout::browser::PageFactory>;
    let coordinator = match Coordinator::new(config, HASH, pages, fresh) {
        Ok(coordinator) => coordinator,
        Err(e) => panic!("coordinator setup failed: {}", e),
    };
    coordinator.run().await.expect("run completes")
}

fn open_db(dir: &Path) -> SqliteStorage {
    SqliteStorage::new(&dir.join("retailers.db")).expect("database opens")
}

#[tokio::test(start_paused = true)]
async fn test_single_postal_code_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(ScriptedSite::new(SiteScript::default()));

    let report = run_crawl(test_config(&["20095"], dir.path()), &site, false).await;

    assert_eq!(report.sessions.len(), 1);
    let session = &report.sessions[0];
    assert_eq!(session.postal_code.as_str(), "20095");
    assert_eq!(session.state, CrawlState::Extracted);
    assert_eq!((session.found, session.kept, session.dropped), (2, 2, 0));
    assert_eq!(session.error, None);

    // The page saw a dismissed banner, the typed code and the 25 km option
    assert!(site.log.consent_clicks.load(Ordering::SeqCst) >= 1);
    assert_eq!(*site.log.submitted_codes.lock().unwrap(), vec!["20095"]);
    assert_eq!(*site.log.radius_choices.lock().unwrap(), vec![1]);
    assert_eq!(site.log.closed.load(Ordering::SeqCst), 1);

    let storage = open_db(dir.path());
    let run = storage.get_run(report.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.finished_at.is_some());

    let records = storage.load_records(report.run_id).unwrap();
    assert_eq!(records.len(), 2);

    let nord = &records[0];
    assert_eq!(nord.name, "Bioladen Nord");
    assert_eq!(nord.street.as_deref(), Some("Hauptstraße 1"));
    assert_eq!(nord.zip.as_deref(), Some("20095"));
    assert_eq!(nord.city.as_deref(), Some("Hamburg"));
    assert_eq!(nord.phone.as_deref(), Some("040 123456"));
    assert_eq!(nord.distance_km, Some(1.2));
    assert_eq!(
        nord.detail_url.as_deref(),
        Some("https://www.bioladen.de/haendler/bioladen-nord")
    );
    assert_eq!(nord.country, "DE");
    assert_eq!(nord.source, "bioladen.de");

    let sessions = storage.load_sessions(report.run_id).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].final_state, CrawlState::Extracted);
    assert_eq!((sessions[0].kept, sessions[0].dropped), (2, 0));

    // Nothing answered with JSON, so there is no API capture
    assert!(!dir.path().join("diagnostics").join(LAST_API_FILE).exists());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_postal_code_is_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(ScriptedSite::new(SiteScript::default()));

    let report = run_crawl(test_config(&["20095", "20095"], dir.path()), &site, false).await;

    let counts: Vec<_> = report.sessions.iter().map(|s| (s.kept, s.dropped)).collect();
    assert_eq!(counts, vec![(2, 0), (0, 2)]);
    assert_eq!(report.total_kept(), 2);
    assert_eq!(report.total_dropped(), 2);

    let storage = open_db(dir.path());
    assert_eq!(storage.count_records(report.run_id).unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_listings_without_detail_url_are_never_merged() {
    let dir = tempfile::tempdir().unwrap();
    let undetailed = r#"<html><body><div class="results">
        <article class="dealer"><h3>Hofladen Ost</h3><p>Feldweg 2<br>20099 Hamburg</p></article>
        <article class="dealer"><h3>Hofladen Ost</h3><p>Feldweg 2<br>20099 Hamburg</p></article>
    </div></body></html>"#;
    let site = Arc::new(ScriptedSite::new(SiteScript {
        default_results: undetailed.to_string(),
        ..SiteScript::default()
    }));

    let report = run_crawl(test_config(&["20099", "20099"], dir.path()), &site, false).await;

    assert_eq!(report.total_kept(), 4);
    assert_eq!(report.total_dropped(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_zip_input_fails_only_that_session() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(ScriptedSite::new(SiteScript {
        broken_forms: [0].into_iter().collect(),
        ..SiteScript::default()
    }));

    let report = run_crawl(test_config(&["20095", "20097"], dir.path()), &site, false).await;

    assert_eq!(report.sessions.len(), 2);
    let failed = &report.sessions[0];
    assert_eq!(failed.state, CrawlState::Failed);
    assert_eq!(failed.kept, 0);
    assert!(failed
        .error
        .as_deref()
        .is_some_and(|e| e.contains("Postal-code input")));

    let next = &report.sessions[1];
    assert_eq!(next.state, CrawlState::Extracted);
    assert_eq!(next.kept, 2);
    assert_eq!(report.failed(), 1);

    assert!(dir.path().join("diagnostics/20095_fill_error.png").exists());
    assert_eq!(site.log.closed.load(Ordering::SeqCst), 2);

    let storage = open_db(dir.path());
    let sessions: Vec<SessionRecord> = storage.load_sessions(report.run_id).unwrap();
    assert_eq!(sessions[0].final_state, CrawlState::Failed);
    assert!(sessions[0].error_message.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_navigation_hits_handler_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(ScriptedSite::new(SiteScript {
        stalled_pages: [0].into_iter().collect(),
        ..SiteScript::default()
    }));

    let report = run_crawl(test_config(&["20095", "20097"], dir.path()), &site, false).await;

    assert_eq!(report.sessions[0].state, CrawlState::Failed);
    assert!(report.sessions[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("handler timeout")));
    assert_eq!(report.sessions[1].state, CrawlState::Extracted);
    assert_eq!(site.log.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_results_without_signal_are_extracted_anyway() {
    let dir = tempfile::tempdir().unwrap();
    let quiet = r#"<html><body><ul>
        <li><h4>Naturkost Eck</h4><p>Lindenallee 3<br>22767 Hamburg</p></li>
    </ul></body></html>"#;
    let site = Arc::new(ScriptedSite::new(SiteScript {
        default_results: quiet.to_string(),
        ..SiteScript::default()
    }));

    let report = run_crawl(test_config(&["22767"], dir.path()), &site, false).await;

    let session = &report.sessions[0];
    assert_eq!(session.state, CrawlState::Extracted);
    assert_eq!(session.kept, 1);

    let records = open_db(dir.path()).load_records(report.run_id).unwrap();
    assert_eq!(records[0].name, "Naturkost Eck");
    assert_eq!(records[0].street.as_deref(), Some("Lindenallee 3"));
    assert_eq!(records[0].detail_url, None);

    // Every poll looked for result text before giving up
    assert_eq!(site.log.body_text_reads.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn test_url_change_counts_as_results() {
    let dir = tempfile::tempdir().unwrap();
    let quiet = r#"<html><body><ul>
        <li><h4>Naturkost Eck</h4><p>Lindenallee 3<br>22767 Hamburg</p></li>
    </ul></body></html>"#;
    let site = Arc::new(ScriptedSite::new(SiteScript {
        results_by_code: HashMap::from([("22767".to_string(), quiet.to_string())]),
        results_url: Some(
            "https://www.bioladen.de/bio-haendler-suche?tx_biohandel_plg[searchplz]=22767"
                .to_string(),
        ),
        ..SiteScript::default()
    }));

    let report = run_crawl(test_config(&["22767"], dir.path()), &site, false).await;

    assert_eq!(report.sessions[0].state, CrawlState::Extracted);
    assert_eq!(report.sessions[0].kept, 1);
    // The first poll saw no result signal but the new URL ended the wait
    assert_eq!(site.log.body_text_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_result_page_captures_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let empty = r#"<html><body><div class="results">Keine Treffer gefunden.</div></body></html>"#;
    let site = Arc::new(ScriptedSite::new(SiteScript {
        default_results: empty.to_string(),
        ..SiteScript::default()
    }));

    let report = run_crawl(test_config(&["99999"], dir.path()), &site, false).await;

    assert_eq!(report.sessions[0].state, CrawlState::Extracted);
    assert_eq!(report.sessions[0].found, 0);
    assert!(dir.path().join("diagnostics/debug_99999.png").exists());
    let html = std::fs::read_to_string(dir.path().join("diagnostics/debug_99999.html")).unwrap();
    assert!(html.contains("Keine Treffer"));
}

#[tokio::test(start_paused = true)]
async fn test_radius_falls_back_to_first_option() {
    let dir = tempfile::tempdir().unwrap();
    let form = SEARCH_FORM
        .replace("<option>10 km</option>", "<option>Umkreis wählen</option>")
        .replace("<option>25 km</option>", "<option>5 km</option>")
        .replace("<option>50 km</option>", "<option>10 km</option>");
    let site = Arc::new(ScriptedSite::new(SiteScript {
        form,
        ..SiteScript::default()
    }));

    let report = run_crawl(test_config(&["20095"], dir.path()), &site, false).await;

    assert_eq!(report.sessions[0].state, CrawlState::Extracted);
    assert_eq!(*site.log.radius_choices.lock().unwrap(), vec![0]);
}

#[tokio::test(start_paused = true)]
async fn test_listings_inside_frame_are_found() {
    let dir = tempfile::tempdir().unwrap();
    let shell = r#"<html><body><div class="results"><iframe src="/haendler-liste"></iframe></div></body></html>"#;
    let framed = results_page(&[listing(
        "Reformhaus Mitte",
        "Lange Reihe 12",
        "20099 Hamburg",
        "/haendler/reformhaus-mitte",
    )]);
    let site = Arc::new(ScriptedSite::new(SiteScript {
        default_results: shell.to_string(),
        result_frames: vec![None, Some(framed)],
        ..SiteScript::default()
    }));

    let report = run_crawl(test_config(&["20099"], dir.path()), &site, false).await;

    assert_eq!(report.sessions[0].kept, 1);
    let records = open_db(dir.path()).load_records(report.run_id).unwrap();
    assert_eq!(records[0].name, "Reformhaus Mitte");
    assert_eq!(records[0].category.as_deref(), Some("Reformhaus"));
    assert_eq!(
        records[0].detail_url.as_deref(),
        Some("https://www.bioladen.de/haendler/reformhaus-mitte")
    );
}

#[tokio::test(start_paused = true)]
async fn test_radius_uses_first_select_then_custom_dropdown() {
    let dir = tempfile::tempdir().unwrap();
    let unnamed_select = SEARCH_FORM
        .replace("tx_biohandel_plg[distance]", "umkreis")
        .replace("<option>10 km</option>", "<option>Bitte wählen</option>")
        .replace("<option>25 km</option>", "<option>10 km</option>")
        .replace("<option>50 km</option>", "<option>25 km</option>");
    let dropdown = SEARCH_FORM.replace(
        r#"<select name="tx_biohandel_plg[distance]">
    <option>10 km</option>
    <option>25 km</option>
    <option>50 km</option>
  </select>"#,
        r#"<div role="combobox" aria-label="Umkreis">
    <div role="option">10 km</div>
    <div role="option">25 km</div>
    <div role="option">50 km</div>
  </div>"#,
    );
    assert!(dropdown.contains("combobox"));
    let site = Arc::new(ScriptedSite::new(SiteScript {
        forms_by_page: HashMap::from([(0, unnamed_select), (1, dropdown)]),
        ..SiteScript::default()
    }));

    let report = run_crawl(test_config(&["20095", "20097"], dir.path()), &site, false).await;

    assert!(report
        .sessions
        .iter()
        .all(|session| session.state == CrawlState::Extracted));
    // 25 km is the third entry of the plain select, the second dropdown option
    assert_eq!(*site.log.radius_choices.lock().unwrap(), vec![2, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_scroll_stops_when_height_stops_growing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&["20095"], dir.path());
    config.crawler.scroll_steps = 10;

    let endless = Arc::new(ScriptedSite::new(SiteScript {
        page_heights: (0..=20).map(|n| 2400.0 + 1200.0 * n as f64).collect(),
        ..SiteScript::default()
    }));
    run_crawl(config.clone(), &endless, true).await;
    assert_eq!(endless.log.scrolls.load(Ordering::SeqCst), 10);

    let settled = Arc::new(ScriptedSite::new(SiteScript {
        page_heights: vec![2400.0, 3600.0, 4800.0],
        ..SiteScript::default()
    }));
    run_crawl(config, &settled, true).await;
    // Two steps grew the page, the third found nothing new
    assert_eq!(settled.log.scrolls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_hidden_zip_input_is_forced() {
    let dir = tempfile::tempdir().unwrap();
    let form = SEARCH_FORM.replace(
        r#"<input type="text" name="tx_biohandel_plg[searchplz]" placeholder="PLZ">"#,
        r#"<input type="hidden" name="tx_biohandel_plg[searchplz]">"#,
    );
    assert!(form.contains(r#"type="hidden""#));
    let site = Arc::new(ScriptedSite::new(SiteScript {
        form,
        ..SiteScript::default()
    }));

    let report = run_crawl(test_config(&["20095"], dir.path()), &site, false).await;

    assert_eq!(report.sessions[0].state, CrawlState::Extracted);
    assert_eq!(report.sessions[0].kept, 2);
    assert_eq!(*site.log.forced_values.lock().unwrap(), vec!["20095"]);
    assert_eq!(*site.log.submitted_codes.lock().unwrap(), vec!["20095"]);
}

#[tokio::test(start_paused = true)]
async fn test_search_api_response_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(ScriptedSite::new(SiteScript {
        api_response: Some(ApiResponse {
            url: "https://www.bioladen.de/index.php?eID=dealer_search&plz=20095".to_string(),
            json: serde_json::json!({"dealers": [{"name": "Bioladen Nord"}]}),
        }),
        ..SiteScript::default()
    }));

    run_crawl(test_config(&["20095"], dir.path()), &site, false).await;

    let path = dir.path().join("diagnostics").join(LAST_API_FILE);
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(
        saved["url"],
        "https://www.bioladen.de/index.php?eID=dealer_search&plz=20095"
    );
    assert_eq!(saved["json"]["dealers"][0]["name"], "Bioladen Nord");
}

#[tokio::test(start_paused = true)]
async fn test_resume_skips_finished_postal_codes() {
    let dir = tempfile::tempdir().unwrap();

    // An interrupted run that already stored one retailer for 20095
    let run_id = {
        let mut storage = open_db(dir.path());
        let run_id = storage.create_run(HASH).unwrap();
        let mut known = RetailerRecord::new("Bioladen Nord", chrono::Utc::now());
        known.detail_url = Some("https://www.bioladen.de/haendler/bioladen-nord".to_string());
        storage.insert_records(run_id, "20095", &[known]).unwrap();
        storage
            .record_session(
                run_id,
                &SessionRecord {
                    postal_code: "20095".to_string(),
                    final_state: CrawlState::Extracted,
                    kept: 1,
                    dropped: 0,
                    error_message: None,
                    finished_at: chrono::Utc::now().to_rfc3339(),
                },
            )
            .unwrap();
        run_id
    };

    let site = Arc::new(ScriptedSite::new(SiteScript::default()));
    let report = run_crawl(test_config(&["20095", "20097"], dir.path()), &site, false).await;

    assert_eq!(report.run_id, run_id);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.sessions[0].postal_code.as_str(), "20097");
    assert_eq!((report.sessions[0].kept, report.sessions[0].dropped), (1, 1));
    assert_eq!(*site.log.submitted_codes.lock().unwrap(), vec!["20097"]);

    let storage = open_db(dir.path());
    assert_eq!(storage.count_records(run_id).unwrap(), 2);
    assert_eq!(storage.get_run(run_id).unwrap().status, RunStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_run_ignores_interrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    let interrupted = open_db(dir.path()).create_run(HASH).unwrap();

    let site = Arc::new(ScriptedSite::new(SiteScript::default()));
    let report = run_crawl(test_config(&["20095"], dir.path()), &site, true).await;

    assert_ne!(report.run_id, interrupted);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.sessions.len(), 1);
}

#[test]
fn test_empty_postal_code_list_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(ScriptedSite::new(SiteScript::default()));
    let pages = Arc::clone(&site) as Arc<dyn haendler_scout::browser::PageFactory>;

    let result = Coordinator::new(test_config(&[], dir.path()), HASH, pages, false);

    assert!(matches!(
        result,
        Err(ScoutError::Config(ConfigError::NoPostalCodes))
    ));
    assert_eq!(site.log.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exports_after_run() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(ScriptedSite::new(SiteScript {
        broken_forms: [1].into_iter().collect(),
        ..SiteScript::default()
    }));
    let report = run_crawl(test_config(&["20095", "20097"], dir.path()), &site, false).await;

    let storage = open_db(dir.path());
    let stats = load_statistics(&storage).unwrap();
    assert_eq!(stats.run.id, report.run_id);
    assert_eq!(stats.total_records, 2);
    assert_eq!(stats.failed_postal_codes.len(), 1);

    let path = dir.path().join("retailers.jsonl");
    assert_eq!(export_json_lines(&storage, report.run_id, &path).unwrap(), 2);
    let first: serde_json::Value = serde_json::from_str(
        std::fs::read_to_string(&path).unwrap().lines().next().unwrap(),
    )
    .unwrap();
    assert_eq!(first["zip"], "20095");
    assert_eq!(first["distanceKm"], 1.2);

    let markdown = format_markdown_summary(&stats);
    assert!(markdown.contains("| extracted | 1 |"));
    assert!(markdown.contains("| 20097 |"));
}
