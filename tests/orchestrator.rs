use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio::sync::Semaphore;

use kira_omics_dashboard::analytics::{
    AnalyticsClient, CompositionRow, CorrelationMatrix, DiversitySample, DrugTarget,
    EnrichmentResult, EnrichmentTerm, Interaction, PlsScore, Summary,
};
use kira_omics_dashboard::domain::{DifferentialRecord, GroupPair, SortKey, SortSpec};
use kira_omics_dashboard::error::KiraError;
use kira_omics_dashboard::export::ExportSink;
use kira_omics_dashboard::orchestrator::{CascadeOrchestrator, PrimaryOutcome, SlotOutcome};
use kira_omics_dashboard::projector::SignificanceGate;
use kira_omics_dashboard::session::{Phase, SecondaryKind};

#[derive(Default)]
struct MockAnalytics {
    primary: Mutex<VecDeque<Result<Vec<DifferentialRecord>, KiraError>>>,
    secondary_calls: Mutex<Vec<(&'static str, Vec<String>)>>,
    primary_calls: Mutex<usize>,
    hold_primary_call: Option<(usize, Arc<Semaphore>)>,
    hold_secondary: Option<Arc<Semaphore>>,
    fail_interactions: bool,
}

impl MockAnalytics {
    fn with_primary(responses: Vec<Result<Vec<DifferentialRecord>, KiraError>>) -> Self {
        Self {
            primary: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(&'static str, Vec<String>)> {
        self.secondary_calls.lock().unwrap().clone()
    }

    async fn secondary(&self, name: &'static str, genes: &[String]) {
        self.secondary_calls
            .lock()
            .unwrap()
            .push((name, genes.to_vec()));
        if let Some(hold) = &self.hold_secondary {
            let _permit = hold.acquire().await.unwrap();
        }
    }
}

#[async_trait]
impl AnalyticsClient for MockAnalytics {
    async fn summary(&self) -> Result<Summary, KiraError> {
        Err(KiraError::ApiHttp("not used".to_string()))
    }

    async fn differential_expression(
        &self,
        _pair: &GroupPair,
    ) -> Result<Vec<DifferentialRecord>, KiraError> {
        let response = self
            .primary
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()));
        let call = {
            let mut calls = self.primary_calls.lock().unwrap();
            *calls += 1;
            *calls - 1
        };
        if let Some((held, hold)) = &self.hold_primary_call {
            if *held == call {
                let _permit = hold.acquire().await.unwrap();
            }
        }
        response
    }

    async fn enrichment(&self, genes: &[String]) -> Result<EnrichmentResult, KiraError> {
        self.secondary("enrichment", genes).await;
        let mut result = EnrichmentResult::default();
        result.libraries.insert(
            "KEGG_2021_Human".to_string(),
            vec![EnrichmentTerm {
                term: "IL-17 signaling pathway".to_string(),
                p_value: 0.0004,
                adj_p_value: Some(0.02),
                genes: genes.to_vec(),
            }],
        );
        Ok(result)
    }

    async fn interactions(&self, genes: &[String]) -> Result<Vec<Interaction>, KiraError> {
        self.secondary("interaction", genes).await;
        if self.fail_interactions {
            return Err(KiraError::ApiStatus {
                status: 502,
                message: "STRING unavailable".to_string(),
            });
        }
        Ok(vec![Interaction {
            protein_a: "IL6".to_string(),
            protein_b: "IL6R".to_string(),
            score: 0.999,
        }])
    }

    async fn drug_targets(&self, genes: &[String]) -> Result<Vec<DrugTarget>, KiraError> {
        self.secondary("drug_target", genes).await;
        Ok(vec![DrugTarget {
            gene: "IL6".to_string(),
            drug: "SILTUXIMAB".to_string(),
            interaction_types: vec!["inhibitor".to_string()],
            score: Some(12.5),
        }])
    }

    async fn diversity(&self) -> Result<Vec<DiversitySample>, KiraError> {
        Err(KiraError::ApiHttp("not used".to_string()))
    }

    async fn composition(&self) -> Result<Vec<CompositionRow>, KiraError> {
        Err(KiraError::ApiHttp("not used".to_string()))
    }

    async fn correlation(&self) -> Result<CorrelationMatrix, KiraError> {
        Err(KiraError::ApiHttp("not used".to_string()))
    }

    async fn integration(&self) -> Result<Vec<PlsScore>, KiraError> {
        Err(KiraError::ApiHttp("not used".to_string()))
    }
}

#[derive(Default)]
struct MemorySink {
    saved: Mutex<Vec<(String, String)>>,
}

impl ExportSink for MemorySink {
    fn save(&self, file_name: &str, contents: &str) -> Result<String, KiraError> {
        self.saved
            .lock()
            .unwrap()
            .push((file_name.to_string(), contents.to_string()));
        Ok(format!("memory://{file_name}"))
    }
}

fn scenario_records() -> Vec<DifferentialRecord> {
    vec![
        DifferentialRecord::new("IL6", 3.1, 0.001, Some(0.01)),
        DifferentialRecord::new("ACTB", 0.1, 0.5, Some(0.9)),
    ]
}

fn pair() -> GroupPair {
    GroupPair::parse("Asymptomatic", "Mild").unwrap()
}

#[tokio::test]
async fn significant_primary_triggers_three_secondary_queries() {
    let client = Arc::new(MockAnalytics::with_primary(vec![Ok(scenario_records())]));
    let orchestrator =
        CascadeOrchestrator::with_shared_client(Arc::clone(&client), SignificanceGate::default());

    let outcome = orchestrator.run_primary_analysis(pair()).await;
    let handle = match outcome {
        PrimaryOutcome::CascadeStarted(handle) => handle,
        other => panic!("expected cascade, got {other:?}"),
    };
    assert_eq!(handle.genes(), ["IL6".to_string()]);

    let view = orchestrator.significant_view();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].gene, "IL6");

    let report = handle.settled().await.unwrap();
    assert!(report.applied);
    assert_eq!(report.enrichment, SlotOutcome::Applied);
    assert_eq!(report.interaction, SlotOutcome::Applied);
    assert_eq!(report.drug_target, SlotOutcome::Applied);

    let mut calls = client.calls();
    calls.sort_by_key(|(name, _)| *name);
    assert_eq!(calls.len(), 3);
    for (_, genes) in &calls {
        assert_eq!(genes, &vec!["IL6".to_string()]);
    }

    let state = orchestrator.state();
    assert_eq!(state.phase, Phase::SecondaryDone);
    assert!(!state.primary_busy);
    assert!(!state.secondary_busy);
    assert!(state.has_secondary(SecondaryKind::Enrichment));
    assert!(state.has_secondary(SecondaryKind::Interaction));
    assert!(state.has_secondary(SecondaryKind::DrugTarget));
    assert!(state.completed_at.is_some());
}

#[tokio::test]
async fn insignificant_primary_skips_cascade() {
    let records = vec![
        DifferentialRecord::new("IL6", 5.0, 0.01, None),
        DifferentialRecord::new("TNF", -4.0, 0.2, None),
        DifferentialRecord::new("ACTB", 0.1, 0.5, None),
    ];
    let client = Arc::new(MockAnalytics::with_primary(vec![Ok(records)]));
    let orchestrator =
        CascadeOrchestrator::with_shared_client(Arc::clone(&client), SignificanceGate::default());

    let outcome = orchestrator.run_primary_analysis(pair()).await;
    assert_matches!(outcome, PrimaryOutcome::NoSecondary);
    assert!(client.calls().is_empty());

    let state = orchestrator.state();
    assert_eq!(state.phase, Phase::DoneNoSecondary);
    assert!(!state.secondary_busy);
    assert_eq!(state.records.len(), 3);
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn cascade_gene_list_is_capped_in_original_order() {
    let records: Vec<DifferentialRecord> = (0..150)
        .map(|i| {
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            DifferentialRecord::new(&format!("G{i}"), sign * (2.5 + i as f64), 0.001, None)
        })
        .collect();
    let client = Arc::new(MockAnalytics::with_primary(vec![Ok(records)]));
    let orchestrator =
        CascadeOrchestrator::with_shared_client(Arc::clone(&client), SignificanceGate::default());

    let handle = match orchestrator.run_primary_analysis(pair()).await {
        PrimaryOutcome::CascadeStarted(handle) => handle,
        other => panic!("expected cascade, got {other:?}"),
    };
    let expected: Vec<String> = (0..100).map(|i| format!("G{i}")).collect();
    assert_eq!(handle.genes(), expected.as_slice());
    handle.settled().await.unwrap();

    let calls = client.calls();
    assert_eq!(calls.len(), 3);
    for (_, genes) in calls {
        assert_eq!(genes, expected);
    }
}

#[tokio::test]
async fn late_secondary_responses_from_superseded_run_are_dropped() {
    let hold = Arc::new(Semaphore::new(0));
    let client = Arc::new(MockAnalytics {
        primary: Mutex::new(
            vec![
                Ok(scenario_records()),
                Ok(vec![DifferentialRecord::new("ACTB", 0.1, 0.5, None)]),
            ]
            .into(),
        ),
        hold_secondary: Some(Arc::clone(&hold)),
        ..MockAnalytics::default()
    });
    let orchestrator =
        CascadeOrchestrator::with_shared_client(Arc::clone(&client), SignificanceGate::default());

    let first = match orchestrator.run_primary_analysis(pair()).await {
        PrimaryOutcome::CascadeStarted(handle) => handle,
        other => panic!("expected cascade, got {other:?}"),
    };
    // let the cascade dispatch and park on the semaphore
    tokio::task::yield_now().await;
    let running = orchestrator.state();
    assert!(running.secondary_busy);
    assert!(!running.primary_busy);
    assert_eq!(running.phase, Phase::SecondaryRunning);

    let second = orchestrator
        .run_primary_analysis(GroupPair::parse("Mild", "Severe").unwrap())
        .await;
    assert_matches!(second, PrimaryOutcome::NoSecondary);

    hold.add_permits(1);
    let report = first.settled().await.unwrap();
    assert!(!report.applied);
    assert_eq!(report.generation, 1);
    assert_eq!(report.enrichment, SlotOutcome::Stale);
    assert_eq!(report.interaction, SlotOutcome::Stale);
    assert_eq!(report.drug_target, SlotOutcome::Stale);

    let state = orchestrator.state();
    assert_eq!(state.generation, 2);
    assert_eq!(state.phase, Phase::DoneNoSecondary);
    assert!(state.enrichment.is_none());
    assert!(state.interactions.is_none());
    assert!(state.drug_targets.is_none());
    assert!(!state.secondary_busy);
}

#[tokio::test]
async fn failing_secondary_is_contained_to_its_slot() {
    let client = Arc::new(MockAnalytics {
        primary: Mutex::new(vec![Ok(scenario_records())].into()),
        fail_interactions: true,
        ..MockAnalytics::default()
    });
    let orchestrator =
        CascadeOrchestrator::with_shared_client(Arc::clone(&client), SignificanceGate::default());

    let handle = match orchestrator.run_primary_analysis(pair()).await {
        PrimaryOutcome::CascadeStarted(handle) => handle,
        other => panic!("expected cascade, got {other:?}"),
    };
    let report = handle.settled().await.unwrap();
    assert!(report.applied);
    assert_matches!(report.interaction, SlotOutcome::Failed(_));
    assert_eq!(report.enrichment, SlotOutcome::Applied);
    assert_eq!(report.drug_target, SlotOutcome::Applied);

    let state = orchestrator.state();
    assert!(state.interactions.is_none());
    assert!(state.enrichment.is_some());
    assert!(state.drug_targets.is_some());
    assert!(!state.secondary_busy);
    assert_eq!(state.phase, Phase::SecondaryDone);
}

#[tokio::test]
async fn failed_rerun_keeps_previous_records() {
    let client = Arc::new(MockAnalytics::with_primary(vec![
        Ok(scenario_records()),
        Err(KiraError::ApiStatus {
            status: 400,
            message: "No samples found for groups: Mild, Mild".to_string(),
        }),
    ]));
    let orchestrator =
        CascadeOrchestrator::with_shared_client(Arc::clone(&client), SignificanceGate::default());

    if let PrimaryOutcome::CascadeStarted(handle) = orchestrator.run_primary_analysis(pair()).await
    {
        handle.settled().await.unwrap();
    }

    let outcome = orchestrator
        .run_primary_analysis(GroupPair::parse("Mild", "Mild").unwrap())
        .await;
    assert_matches!(
        outcome,
        PrimaryOutcome::Failed {
            error: KiraError::ApiStatus { status: 400, .. }
        }
    );

    let state = orchestrator.state();
    assert_eq!(state.phase, Phase::PrimaryFailed);
    assert!(!state.primary_busy);
    assert_eq!(state.records, scenario_records());
    assert!(state.last_error.as_deref().unwrap().contains("No samples found"));
    // secondary results of the earlier run no longer match the view
    assert!(state.enrichment.is_none());
    assert_eq!(client.calls().len(), 3);
}

#[tokio::test]
async fn export_uses_current_sort_and_pair() {
    let records = vec![
        DifferentialRecord::new("IL6", 3.1, 0.001, Some(0.01)),
        DifferentialRecord::new("CXCL10", -4.2, 0.0001, None),
        DifferentialRecord::new("ACTB", 0.1, 0.5, Some(0.9)),
    ];
    let client = MockAnalytics::with_primary(vec![Ok(records)]);
    let orchestrator = CascadeOrchestrator::new(client, SignificanceGate::default());

    let sink = MemorySink::default();
    assert_matches!(
        orchestrator.export_significant(&sink),
        Err(KiraError::NothingToExport)
    );

    if let PrimaryOutcome::CascadeStarted(handle) = orchestrator.run_primary_analysis(pair()).await
    {
        handle.settled().await.unwrap();
    }
    assert_eq!(orchestrator.toggle_sort(SortKey::LogFc), SortSpec::ascending(SortKey::LogFc));

    let report = orchestrator.export_significant(&sink).unwrap();
    assert_eq!(report.rows, 2);
    assert_eq!(report.file_name, "dea_results_Asymptomatic_vs_Mild.csv");
    assert_eq!(report.location, "memory://dea_results_Asymptomatic_vs_Mild.csv");

    let saved = sink.saved.lock().unwrap();
    assert_eq!(
        saved[0].1,
        "Gene,LogFC,P-value,Adj P-value\nCXCL10,-4.2,0.0001,\nIL6,3.1,0.001,0.01\n"
    );
}

#[tokio::test]
async fn overlapping_primary_queries_keep_only_the_latest() {
    let hold = Arc::new(Semaphore::new(0));
    let latest = vec![DifferentialRecord::new("TNF", 0.4, 0.3, None)];
    let client = Arc::new(MockAnalytics {
        primary: Mutex::new(
            vec![
                Ok(scenario_records()),
                Ok(vec![DifferentialRecord::new("CXCL10", -4.2, 0.0001, None)]),
                Ok(latest.clone()),
            ]
            .into(),
        ),
        hold_primary_call: Some((1, Arc::clone(&hold))),
        ..MockAnalytics::default()
    });
    let orchestrator =
        CascadeOrchestrator::with_shared_client(Arc::clone(&client), SignificanceGate::default());

    if let PrimaryOutcome::CascadeStarted(handle) = orchestrator.run_primary_analysis(pair()).await
    {
        handle.settled().await.unwrap();
    }
    assert!(orchestrator.state().enrichment.is_some());

    let slow = orchestrator.run_primary_analysis(GroupPair::parse("Mild", "Severe").unwrap());
    let fast = async {
        // the slow query is parked on the semaphore by now
        let in_flight = orchestrator.state();
        let outcome = orchestrator
            .run_primary_analysis(GroupPair::parse("Asymptomatic", "Severe").unwrap())
            .await;
        hold.add_permits(1);
        (in_flight, outcome)
    };
    let (slow, (in_flight, fast)) = tokio::join!(slow, fast);

    assert!(in_flight.primary_busy);
    assert_eq!(in_flight.phase, Phase::PrimaryRunning);
    assert_eq!(in_flight.generation, 2);
    assert!(in_flight.enrichment.is_none());
    assert!(in_flight.interactions.is_none());
    assert!(in_flight.drug_targets.is_none());

    assert_matches!(fast, PrimaryOutcome::NoSecondary);
    assert_matches!(slow, PrimaryOutcome::Superseded);

    let state = orchestrator.state();
    assert_eq!(state.generation, 3);
    assert_eq!(state.records, latest);
    assert_eq!(
        state.pair,
        Some(GroupPair::parse("Asymptomatic", "Severe").unwrap())
    );
    assert_eq!(state.phase, Phase::DoneNoSecondary);
    assert!(!state.primary_busy);
    // only the first run reached the cascade
    assert_eq!(client.calls().len(), 3);
}

#[tokio::test]
async fn export_after_failed_rerun_uses_pair_of_stored_records() {
    let client = MockAnalytics::with_primary(vec![
        Ok(scenario_records()),
        Err(KiraError::ApiStatus {
            status: 400,
            message: "No samples found for groups: Mild, Mild".to_string(),
        }),
    ]);
    let orchestrator = CascadeOrchestrator::new(client, SignificanceGate::default());

    if let PrimaryOutcome::CascadeStarted(handle) = orchestrator.run_primary_analysis(pair()).await
    {
        handle.settled().await.unwrap();
    }
    let mild = GroupPair::parse("Mild", "Mild").unwrap();
    assert_matches!(
        orchestrator.run_primary_analysis(mild.clone()).await,
        PrimaryOutcome::Failed { .. }
    );

    let state = orchestrator.state();
    assert_eq!(state.pair, Some(pair()));
    assert_eq!(state.requested_pair, Some(mild));

    let sink = MemorySink::default();
    let report = orchestrator.export_significant(&sink).unwrap();
    assert_eq!(report.file_name, "dea_results_Asymptomatic_vs_Mild.csv");
    assert_eq!(report.rows, 1);
}

#[tokio::test]
async fn failed_first_run_has_nothing_to_export() {
    let client = MockAnalytics::with_primary(vec![Err(KiraError::ApiStatus {
        status: 500,
        message: "internal error".to_string(),
    })]);
    let orchestrator = CascadeOrchestrator::new(client, SignificanceGate::default());

    assert_matches!(
        orchestrator.run_primary_analysis(pair()).await,
        PrimaryOutcome::Failed { .. }
    );
    assert!(orchestrator.state().pair.is_none());

    let sink = MemorySink::default();
    assert_matches!(
        orchestrator.export_significant(&sink),
        Err(KiraError::NothingToExport)
    );
    assert!(sink.saved.lock().unwrap().is_empty());
}
