//! Scheduler daemon: hosts the demo state machine, the proximity switch, and
//! the persistent job scheduler behind one RPC surface.
//!
//! Three independent call sites feed the demo — the RPC handler, the
//! proximity-switch callback, and the job executor pool — and all of them go
//! through the same [`DemoHandle`] channel, so the state machine itself stays
//! single-threaded.

use crate::client::MachClient;
use crate::config::AppConfig;
use crate::demo::{self, DemoHandle, DemoSettings, NullHistory, NullLights};
use crate::error::Result;
use crate::jobs::{JobAction, JobExecutor, JobScheduler, JobStore, ScheduledJob, Trigger};
use crate::patterns::PatternRegistry;
use crate::protocol::{self, Request, SchedRequest, SchedResponse};
use crate::prox::{self, GpioLine};
use crate::server::{BindPolicy, StoppableTcpServer, StopHandle};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

/// Reserved id of the trigger reinstalled fresh on every boot
pub const DAILY_JOB_ID: &str = "daily-demo";

/// Dispatches scheduler commands onto the demo and the job store
pub struct SchedHandler {
    demo: DemoHandle,
    store: Arc<JobStore>,
    stop: StopHandle,
}

impl SchedHandler {
    pub fn new(demo: DemoHandle, store: Arc<JobStore>, stop: StopHandle) -> Self {
        Self { demo, store, stop }
    }

    pub fn handle(&self, request: SchedRequest) -> SchedResponse {
        if !matches!(request, SchedRequest::Status) {
            log::info!("Command: {:?}", request);
        }

        match request {
            SchedRequest::Status => {}
            SchedRequest::DemoOnce => self.demo.demo_once(),
            SchedRequest::DemoContinuous { count } => self.demo.demo_continuous(count),
            SchedRequest::DemoHalt => self.demo.demo_halt(),
            SchedRequest::Restart => self.stop.stop(),
            SchedRequest::JobAdd {
                trigger,
                action,
                params,
            } => {
                let mut response = SchedResponse::state(self.demo.state());
                match self.store.add(trigger, action, params) {
                    Ok(id) => response.job_id = Some(id),
                    Err(e) => response.error = Some(e.to_string()),
                }
                return response;
            }
            SchedRequest::JobDelete { id } => {
                let mut response = SchedResponse::state(self.demo.state());
                if let Err(e) = self.store.delete(&id) {
                    response.error = Some(e.to_string());
                }
                return response;
            }
            SchedRequest::JobList => {
                let mut response = SchedResponse::state(self.demo.state());
                response.jobs = Some(self.store.list());
                return response;
            }
        }
        SchedResponse::state(self.demo.state())
    }
}

/// One request/response exchange; protocol errors answer the current state
pub fn handle_connection(stream: &mut TcpStream, handler: &SchedHandler) {
    let response = match protocol::read_message::<_, Request<SchedRequest>>(stream) {
        Ok(request) => match request.check_version() {
            Ok(()) => handler.handle(request.command),
            Err(e) => {
                log::warn!("{}", e);
                SchedResponse::state(handler.demo.state())
            }
        },
        Err(e) => {
            log::warn!("Bad request: {}", e);
            SchedResponse::state(handler.demo.state())
        }
    };

    if let Err(e) = protocol::write_message(stream, &response) {
        log::warn!("Failed to send response: {}", e);
    }
}

/// Reinstall the boot trigger: the reserved daily job is replaced with one at
/// the configured time; user-persisted jobs are left untouched.
pub fn install_daily_job(store: &JobStore, config: &AppConfig) -> Result<()> {
    store.upsert(ScheduledJob {
        id: DAILY_JOB_ID.to_string(),
        trigger: Trigger::Cron {
            hour: config.scheduler.daily_hour,
            minute: config.scheduler.daily_minute,
        },
        action: JobAction::Demo,
        params: serde_json::Value::Null,
    })
}

/// Map job actions onto the demo. The boot trigger honors the
/// scheduling-enabled flag; explicitly created jobs always run.
pub fn make_executor(demo: DemoHandle, scheduling_enabled: bool) -> JobExecutor {
    Arc::new(move |job| {
        if job.id == DAILY_JOB_ID && !scheduling_enabled {
            log::info!("Schedule is disabled");
            return;
        }
        match &job.action {
            JobAction::Demo => {
                log::info!("Running single demo");
                demo.demo_once();
            }
            JobAction::Method { name } => {
                log::warn!("Job {}: no renderer wired for method '{}'", job.id, name)
            }
            JobAction::Saved { id } => {
                log::warn!("Job {}: no renderer wired for saved drawing '{}'", job.id, id)
            }
        }
    })
}

/// Full daemon lifecycle: demo thread, proximity thread, job scheduler, RPC
/// loop; tears everything down in reverse order on exit.
pub fn run(
    config: &AppConfig,
    registry: Arc<PatternRegistry>,
    policy: BindPolicy,
    stop: StopHandle,
) -> Result<()> {
    log::info!("Starting the sandtable scheduler daemon");

    if registry.is_empty() {
        log::warn!("No pattern generators registered; autonomous drawing is unavailable");
    }

    let machine = MachClient::new(&config.network.mach_address)
        .with_poll_delay(config.demo.polling_delay());
    let (demo, demo_join) = demo::spawn(
        DemoSettings::from_config(config),
        registry,
        Box::new(machine),
        Box::new(NullLights),
        Box::new(NullHistory),
    )?;

    let prox_demo = demo.clone();
    let prox = prox::spawn(
        Box::new(GpioLine::new(config.prox.pin)),
        config.prox.window(),
        config.demo.polling_delay(),
        move |taps| prox_demo.prox_callback(taps),
    )?;

    let store = Arc::new(JobStore::open(config.storage.job_store_path())?);
    install_daily_job(&store, config)?;
    let scheduler = JobScheduler::start(
        Arc::clone(&store),
        config.scheduler.workers,
        Duration::from_secs(1),
        make_executor(demo.clone(), config.scheduler.enabled),
    )?;

    let addr = &config.network.scheduler_address;
    log::info!("Trying to listen on {}", addr);
    let serve_result = match StoppableTcpServer::bind(addr, policy, stop.clone()) {
        Ok(server) => {
            let handler = SchedHandler::new(demo.clone(), Arc::clone(&store), stop);
            server.serve(|stream| handle_connection(stream, &handler))
        }
        Err(e) => {
            log::error!("Giving up on listener: {}", e);
            Err(e)
        }
    };

    scheduler.stop();
    prox.stop();
    demo.stop();
    if demo_join.join().is_err() {
        log::error!("Demo thread panicked");
    }
    log::info!("Scheduler daemon shut down");
    serve_result
}
