use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use appcore::state::{channels, JobPatch, JobStatus, StateStore, StoreEvent};
use appcore::{
    tokens, Config, Dependencies, EventBus, Injectable, Listener, LogWriter, PollOptions,
    Poller, ProbeError, ProbeFn, ProbeRef, Runtime,
};

/// Submits jobs to a fake backend and mirrors their status into the store.
struct JobController {
    store: Arc<StateStore>,
    poller: Arc<Poller>,
    bus: Arc<EventBus>,
    cfg: Arc<Config>,
}

impl Injectable for JobController {
    const DEPENDENCIES: &'static [&'static str] = &[
        tokens::STATE_STORE,
        tokens::POLLER,
        tokens::EVENT_BUS,
        tokens::CONFIG,
    ];

    fn construct(deps: Dependencies) -> anyhow::Result<Self> {
        Ok(Self {
            store: deps.get(tokens::STATE_STORE)?,
            poller: deps.get(tokens::POLLER)?,
            bus: deps.get(tokens::EVENT_BUS)?,
            cfg: deps.get(tokens::CONFIG)?,
        })
    }
}

impl JobController {
    fn submit(&self, cohort: &str, job_id: &str, file: &str, fail_every: u32) -> anyhow::Result<()> {
        self.store
            .add_job(job_id, JobPatch::status(JobStatus::Queued).with_file_name(file));
        self.store.add_job_to_cohort(cohort, job_id)?;
        self.store.show_spinner();

        let polls = Arc::new(AtomicU32::new(0));
        let probe: ProbeRef<Value> = ProbeFn::arc(move || {
            let n = polls.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                if n % fail_every == 0 {
                    anyhow::bail!("backend returned 503 on poll #{n}");
                }
                let status = match n {
                    1 => "queued",
                    2..=3 => "processing",
                    _ => "completed",
                };
                Ok::<_, ProbeError>(json!({ "status": status, "progress": (n * 25).min(100) }))
            }
        });

        let (store, bus, id) = (
            (*self.store).clone(),
            (*self.bus).clone(),
            job_id.to_string(),
        );
        let on_update = {
            let (store, id) = (store.clone(), id.clone());
            move |r: &Value| {
                let status = match r["status"].as_str() {
                    Some("processing") => JobStatus::Processing,
                    Some("completed") => JobStatus::Completed,
                    Some("failed") => JobStatus::Failed,
                    _ => JobStatus::Queued,
                };
                store.update_job(
                    &id,
                    JobPatch::status(status).with_field("progress", r["progress"].clone()),
                );
            }
        };
        let on_complete = move |_: &Value| {
            store.hide_spinner();
            bus.emit("job:finished", json!({ "id": id }));
        };

        let handle = self.poller.start(
            job_id,
            probe,
            PollOptions::with_defaults(&self.cfg)
                .on_update(on_update)
                .on_complete(on_complete)
                .on_error(|e| tracing::warn!(error = %e, label = e.as_label(), "poll error")),
        );
        self.store.set_job_poll_stop(job_id, handle.canceller())?;
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config {
        poll_interval: Duration::from_millis(500),
        poll_max_retries: 3,
        ..Config::default()
    };
    let rt = Runtime::builder(cfg)
        .with_injectable::<JobController>("jobController", true)
        .build()?;
    let _log = LogWriter::new().attach(rt.store())?;

    let cohort_done = {
        let store = rt.store().clone();
        Listener::new(move |p: &Value| {
            let id = p["id"].as_str().unwrap_or_default();
            if let Some(cohort) = store.get_job_cohort(id) {
                if store.are_cohort_jobs_complete(&cohort) {
                    info!(cohort = %cohort, "cohort complete");
                    store.clear_countdown();
                }
            }
            Ok(())
        })
    };
    rt.bus().on("job:finished", cohort_done)?;
    rt.store().on(
        channels::COUNTDOWN_TICK,
        Listener::new(|e: &StoreEvent| {
            if let StoreEvent::CountdownTick { time_left, .. } = e {
                info!(time_left, "refresh in");
            }
            Ok(())
        }),
    )?;

    let ctrl = rt.container().resolve::<JobController>("jobController")?;
    rt.store().add_cohort("c1", "baseline");
    rt.store().show_cohort("c1");
    rt.store().start_countdown(None);
    ctrl.submit("c1", "job-1", "sample-a.bam", 5)?;
    ctrl.submit("c1", "job-2", "sample-b.bam", 2)?;

    info!(active = ?rt.poller().get_active(), "polling");
    tokio::time::sleep(Duration::from_secs(8)).await;

    for info in rt.poller().get_all_poll_info() {
        info!(id = %info.id, retries = info.retries, "still polling");
    }
    info!(jobs = ?rt.store().get("jobs"), "final state");
    rt.shutdown();
    Ok(())
}
