//! Job execution.
//!
//! [`Engine`] turns activations (cron, webhook, record changes, buttons) into
//! stored [`Job`]s, hands them to the [`JobQueue`], and runs them: build a
//! fresh evaluation context, execute the task script, call its entry point.
//!
//! Each run happens inside one store transaction. Sub-jobs created with
//! `add_job` are only enqueued after that transaction commits.

use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value as Json;
use tracing::{info, warn};

use tether_script::{Args, Interpreter, Sandbox};
use tether_storage::{
    Job, JobState, LogLevel, Project, RecordId, RecordRef, RecordStore, StoreExt, Task, Trigger,
    TriggerSpec,
};

use crate::clock;
use crate::config::EngineConfig;
use crate::context::{self, records, Runtime};
use crate::error::EngineError;
use crate::http::HttpFetch;
use crate::import::Importer;
use crate::jobs::{EnqueueOptions, JobLogger, JobQueue, LogEntry};
use crate::orders::Orders;
use crate::projects::{Operator, Projects};

/// Entry point of a task run by its UI button.
pub const BUTTON_ENTRY_POINT: &str = "handle_button";

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn RecordStore>,
    /// Reachable from scripts through `url2bin`/`url2base64`.
    http: Arc<dyn HttpFetch>,
    /// Downloads raw bundle files during imports; never handed to scripts.
    import_http: Arc<dyn HttpFetch>,
    queue: Arc<dyn JobQueue>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        http: Arc<dyn HttpFetch>,
        queue: Arc<dyn JobQueue>,
        config: EngineConfig,
    ) -> Self {
        Engine {
            store,
            import_http: http.clone(),
            http,
            queue,
            config,
        }
    }

    /// Use `http` for bundle downloads instead of the script fetcher, e.g. a
    /// fetcher that also reads `file://` URLs of directory bundles.
    pub fn with_import_fetch(mut self, http: Arc<dyn HttpFetch>) -> Self {
        self.import_http = http;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn projects(&self) -> Projects<'_> {
        Projects::new(self.store.as_ref(), &self.config)
    }

    pub fn orders(&self) -> Orders {
        Orders::new(self.store.clone(), self.config.separate_log_transaction)
    }

    pub fn importer(&self) -> Importer {
        Importer::new(self.store.clone(), self.import_http.clone(), self.config.clone())
    }

    // ── Activation ───────────────────────────────────────────────────────────

    fn submit(&self, mut job: Job) -> Result<Job, EngineError> {
        job.created_at = clock::now_rfc3339();
        let mut job = self.store.add(job)?;
        job.queue_ref = Some(self.queue.enqueue(job.id, &EnqueueOptions::default())?);
        self.store.save(&job)?;
        info!(
            job_id = job.id,
            task_id = job.task_id,
            function = job.function.as_deref().unwrap_or(BUTTON_ENTRY_POINT),
            "job enqueued"
        );
        Ok(job)
    }

    fn task(&self, task_id: RecordId) -> Result<Task, EngineError> {
        match self.store.get::<Task>(task_id) {
            Err(tether_storage::StorageError::NotFound { .. }) => {
                Err(EngineError::NotFound(format!("task {}", task_id)))
            }
            other => Ok(other?),
        }
    }

    /// Fire a cron or webhook trigger. A webhook `payload` is passed to
    /// `handle_webhook`.
    pub fn fire(&self, op: &Operator, trigger_id: RecordId, payload: Option<Json>) -> Result<Job, EngineError> {
        let trigger: Trigger = self.store.get(trigger_id)?;
        if !trigger.active {
            return Err(EngineError::Validation(format!(
                "Trigger '{}' is not active",
                trigger.trigger_name
            )));
        }
        let (function, args) = match &trigger.spec {
            TriggerSpec::Cron { .. } => ("handle_cron", Vec::new()),
            TriggerSpec::Webhook { .. } => (
                "handle_webhook",
                vec![payload.unwrap_or(Json::Null)],
            ),
            TriggerSpec::Automation { .. } => {
                return Err(EngineError::Validation(format!(
                    "Trigger '{}' fires on record changes; use fire_automation",
                    trigger.trigger_name
                )))
            }
        };
        self.submit(Job {
            project_id: trigger.project_id,
            task_id: trigger.task_id,
            function: Some(function.to_string()),
            args,
            trigger_name: Some(trigger.trigger_name),
            user: op.name.clone(),
            ..Job::default()
        })
    }

    /// Fire an automation trigger for changed host records; they reach
    /// `handle_db(records)` as record handles.
    pub fn fire_automation(
        &self,
        op: &Operator,
        trigger_id: RecordId,
        changed: &[RecordRef],
    ) -> Result<Job, EngineError> {
        let trigger: Trigger = self.store.get(trigger_id)?;
        let TriggerSpec::Automation { model, .. } = &trigger.spec else {
            return Err(EngineError::Validation(format!(
                "Trigger '{}' is not an automation trigger",
                trigger.trigger_name
            )));
        };
        if let Some(other) = changed.iter().find(|r| &r.model != model) {
            return Err(EngineError::Validation(format!(
                "Trigger '{}' watches {}, not {}",
                trigger.trigger_name, model, other.model
            )));
        }
        let records: Vec<Json> = changed.iter().map(records::encode).collect();
        self.submit(Job {
            project_id: trigger.project_id,
            task_id: trigger.task_id,
            function: Some("handle_db".to_string()),
            args: vec![Json::Array(records)],
            trigger_name: Some(trigger.trigger_name.clone()),
            user: op.name.clone(),
            ..Job::default()
        })
    }

    /// The task's UI button.
    pub fn press_button(&self, op: &Operator, task_id: RecordId) -> Result<Job, EngineError> {
        let task = self.task(task_id)?;
        if task.magic_button.is_none() {
            return Err(EngineError::Validation(format!(
                "Task '{}' has no button",
                task.name
            )));
        }
        self.submit(Job {
            project_id: task.project_id,
            task_id,
            function: Some(BUTTON_ENTRY_POINT.to_string()),
            user: op.name.clone(),
            ..Job::default()
        })
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Run one stored job to completion, retry or failure.
    pub fn run_job(&self, job_id: RecordId) -> Result<Job, EngineError> {
        let mut job: Job = self.store.get(job_id)?;
        if matches!(job.state, JobState::Done | JobState::Failed) {
            return Ok(job);
        }
        job.state = JobState::Started;
        job.attempts += 1;
        self.store.save(&job)?;

        let project: Project = self.projects().get(job.project_id)?;
        let task = self.task(job.task_id)?;
        let logger = JobLogger::new(
            self.store.clone(),
            project.id,
            job.id,
            self.config.separate_log_transaction,
        );

        self.store.begin()?;
        let outcome = self.execute(&project, &task, &job);
        match outcome {
            Ok(pending) => {
                self.store.commit()?;
                for (sub_id, options) in pending {
                    let mut sub: Job = self.store.get(sub_id)?;
                    sub.queue_ref = Some(self.queue.enqueue(sub_id, &options)?);
                    self.store.save(&sub)?;
                }
                job.state = JobState::Done;
                job.error = None;
                info!(job_id = job.id, attempts = job.attempts, "job done");
            }
            Err(err) => {
                self.store.rollback()?;
                let message = err.to_string();
                if err.is_retryable() && job.attempts < self.config.max_retries {
                    job.state = JobState::Retry;
                    job.queue_ref = Some(self.queue.enqueue(job.id, &EnqueueOptions::default())?);
                    warn!(job_id = job.id, attempts = job.attempts, error = %message, "job will be retried");
                } else {
                    job.state = JobState::Failed;
                    logger.log(LogEntry::new(LogLevel::Error, message.clone()).function(
                        job.function.as_deref().unwrap_or(BUTTON_ENTRY_POINT),
                    ))?;
                    warn!(job_id = job.id, error = %message, "job failed");
                }
                job.error = Some(message);
            }
        }
        self.store.save(&job)?;
        Ok(job)
    }

    /// Evaluate the task and call its entry point. Returns the sub-jobs to
    /// enqueue once the transaction commits.
    fn execute(
        &self,
        project: &Project,
        task: &Task,
        job: &Job,
    ) -> Result<Vec<(RecordId, EnqueueOptions)>, EngineError> {
        let entry = job.function.as_deref().unwrap_or(BUTTON_ENTRY_POINT);
        let rt = Rc::new(Runtime::new(
            self.store.clone(),
            self.http.clone(),
            self.config.clone(),
            project.clone(),
            job.clone(),
            Operator::user(&job.user),
        ));
        let ruleset = self.config.baseline_ruleset();
        let mut interp = Interpreter::new(ruleset.limits);
        let result = Self::call_entry(&rt, &mut interp, Sandbox::new(ruleset), task, job, entry);
        interp.release();
        result?;
        Ok(rt.take_pending())
    }

    fn call_entry(
        rt: &Rc<Runtime>,
        interp: &mut Interpreter,
        sandbox: Sandbox,
        task: &Task,
        job: &Job,
        entry: &str,
    ) -> Result<(), EngineError> {
        let ctx = context::build(rt, interp)?;
        rt.set_function(entry);
        let module = sandbox.execute(interp, &task.code, &ctx.namespace)?;
        let Some(function) = module.function(entry) else {
            return Err(EngineError::Validation(format!(
                "Task '{}' does not define {}",
                task.name, entry
            )));
        };
        let mut args = Args::new(job.args.iter().map(|a| records::decode(rt, a)).collect());
        args.keywords = job
            .kwargs
            .iter()
            .map(|(k, v)| (k.clone(), records::decode(rt, v)))
            .collect();
        interp.call(&function, args)?;
        Ok(())
    }

    /// Run queued jobs until the queue is empty.
    pub fn run_pending(&self) -> Result<Vec<Job>, EngineError> {
        let mut done = Vec::new();
        while let Some(job_id) = self.queue.dequeue() {
            done.push(self.run_job(job_id)?);
        }
        Ok(done)
    }

    /// [`run_pending`](Self::run_pending) on the blocking pool.
    pub async fn drain(&self) -> Result<Vec<Job>, EngineError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.run_pending())
            .await
            .map_err(|e| EngineError::Config(format!("job runner panicked: {}", e)))?
    }
}
