//! Built-in lifecycle handlers: `initialize`, `shutdown`, `exit` and `version`.

use crate::dispatcher::JsonRpcHost;
use crate::error::{HostError, RpcError};
use crate::protocol::{
    InitializeParams, InitializeResult, RequestContext, EXIT_EVENT, INITIALIZE_REQUEST,
    SHUTDOWN_REQUEST, VERSION_REQUEST,
};
use crate::server::ServiceCore;
use crate::state::HostState;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// Install the lifecycle handlers on `host`.
pub(crate) fn register_builtin_handlers(
    host: &JsonRpcHost,
    core: &Arc<ServiceCore>,
) -> Result<(), HostError> {
    let c = Arc::clone(core);
    host.set_async_request_handler(
        INITIALIZE_REQUEST,
        move |params, ctx| handle_initialize(Arc::clone(&c), params, ctx),
        false,
    )?;

    let c = Arc::clone(core);
    host.set_async_request_handler(
        SHUTDOWN_REQUEST,
        move |_, ctx| handle_shutdown(Arc::clone(&c), ctx),
        false,
    )?;

    let c = Arc::clone(core);
    host.set_event_handler(
        EXIT_EVENT,
        move |_, _| {
            handle_exit(&c);
            Ok(())
        },
        false,
    )?;

    host.set_request_handler(
        VERSION_REQUEST,
        |_, ctx| Ok(ctx.send_result(env!("CARGO_PKG_VERSION").to_string())?),
        false,
    )?;

    Ok(())
}

async fn handle_initialize(
    core: Arc<ServiceCore>,
    params: InitializeParams,
    ctx: RequestContext<InitializeResult>,
) -> anyhow::Result<()> {
    if let Err(e) = core.state.write().transition(HostState::Initializing) {
        return Err(RpcError::invalid_request(format!("initialize rejected: {e}")).into());
    }
    info!(
        process_id = ?params.process_id,
        root_uri = ?params.root_uri,
        "Initialize requested"
    );

    let tasks = core.initialize_tasks.read().clone();
    let events = ctx.event_context();
    let results = join_all(tasks.iter().map(|task| task(params.clone(), events.clone()))).await;

    {
        let mut state = core.state.write();
        if state.current() == HostState::Initializing {
            state.transition(HostState::Running)?;
        }
    }

    let failures: Vec<String> = results
        .into_iter()
        .filter_map(Result::err)
        .map(|e| format!("{e:#}"))
        .collect();
    if !failures.is_empty() {
        for failure in &failures {
            warn!(error = %failure, "Initialize task failed");
        }
        return Err(RpcError::internal(format!(
            "{} initialize task(s) failed: {}",
            failures.len(),
            failures.join("; ")
        ))
        .into());
    }

    let result = core.initialize_result.read().clone();
    ctx.send_result(result)?;
    Ok(())
}

async fn handle_shutdown(core: Arc<ServiceCore>, ctx: RequestContext<()>) -> anyhow::Result<()> {
    if let Err(e) = core.state.write().transition(HostState::ShuttingDown) {
        return Err(RpcError::invalid_request(format!("shutdown rejected: {e}")).into());
    }
    info!("Shutdown requested");

    let tasks = core.shutdown_tasks.read().clone();
    let events = ctx.event_context();
    let timeout = core.config.shutdown_timeout;
    let pending = join_all(tasks.iter().map(|task| task(events.clone())));

    match tokio::time::timeout(timeout, pending).await {
        Ok(results) => {
            for e in results.into_iter().filter_map(Result::err) {
                warn!(error = %format!("{e:#}"), "Shutdown task failed");
            }
        }
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs_f64(),
                "Shutdown tasks did not finish in time; replying anyway"
            );
        }
    }

    ctx.send_result(())?;
    Ok(())
}

fn handle_exit(core: &ServiceCore) {
    let previous = core.state.write().transition(HostState::Terminated);
    match previous {
        Ok(HostState::ShuttingDown) => info!("Exit requested"),
        Ok(state) => warn!(%state, "Exit requested without a prior shutdown"),
        Err(e) => warn!(error = %e, "Exit received in unexpected state"),
    }
    core.controller.shutdown();
}
