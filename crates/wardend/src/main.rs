use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::{error, info};

use warden_protocol::{
    CredentialAuthority, IdentityVerifier, NonInteractivePrompt, RequirementVerifier,
    SealedTokenAuthority, demo,
};
use wardend::{
    HEALTH_TARGET, HandlerError, HelperService, StructuredHealthReporter, SystemConfigLoader,
    bootstrap_with,
};

const DESCRIPTOR_FLAG: &str = "--descriptor";

#[tokio::main]
async fn main() -> ExitCode {
    let (descriptor, config_args) = split_descriptor(std::env::args_os());
    let helper = match bootstrap_with(
        &SystemConfigLoader::new(config_args),
        Arc::new(StructuredHealthReporter),
        descriptor.as_deref(),
    ) {
        Ok(helper) => helper,
        Err(error) => {
            let _ = writeln!(io::stderr(), "wardend: {error}");
            return ExitCode::FAILURE;
        }
    };

    let config = helper.config();
    let authority = match SealedTokenAuthority::from_key_file(
        config.authority_key_path().as_std_path(),
        config.credential_ttl(),
        Arc::new(NonInteractivePrompt),
    ) {
        Ok(authority) => Arc::new(authority) as Arc<dyn CredentialAuthority>,
        Err(source) => {
            error!(target: HEALTH_TARGET, error = %source, "authority key unavailable");
            return ExitCode::FAILURE;
        }
    };
    let registry = match demo::registry() {
        Ok(registry) => Arc::new(registry),
        Err(source) => {
            error!(target: HEALTH_TARGET, error = %source, "invalid command registry");
            return ExitCode::FAILURE;
        }
    };
    let verifier = Arc::new(RequirementVerifier) as Arc<dyn IdentityVerifier>;

    let mut service = helper.service(registry, authority, verifier);
    if let Err(source) = install_demo_handlers(&mut service) {
        error!(target: HEALTH_TARGET, error = %source, "handler registration failed");
        return ExitCode::FAILURE;
    }

    let listener = match helper.listen().await {
        Ok(listener) => listener,
        Err(source) => {
            error!(target: HEALTH_TARGET, error = %source, "failed to bind helper socket");
            return ExitCode::FAILURE;
        }
    };
    listener.serve(Arc::new(service), termination()).await;
    helper.shutting_down();
    ExitCode::SUCCESS
}

fn install_demo_handlers(
    service: &mut HelperService,
) -> Result<(), wardend::HandlerRegistrationError> {
    service.set_handler(&demo::say_hello(), |message: String, _context| async move {
        Ok::<_, HandlerError>(format!("pong:{message}"))
    })?;
    service.set_handler(&demo::admin_only(), |(), context| async move {
        let uid = context
            .peer()
            .uid()
            .map_or_else(|| "unknown".to_owned(), |uid| uid.to_string());
        Ok::<_, HandlerError>(format!("peer uid {uid}"))
    })
}

/// Pulls `--descriptor PATH` out of the arguments; the rest configure the
/// helper.
fn split_descriptor<I>(args: I) -> (Option<Utf8PathBuf>, Vec<OsString>)
where
    I: IntoIterator<Item = OsString>,
{
    let mut descriptor = None;
    let mut config_args = Vec::new();
    let mut args = args.into_iter();
    while let Some(argument) = args.next() {
        let text = argument.to_string_lossy().into_owned();
        if text == DESCRIPTOR_FLAG {
            descriptor = args.next().map(|value| Utf8PathBuf::from(value.to_string_lossy().as_ref()));
        } else if let Some(value) = text.strip_prefix("--descriptor=") {
            descriptor = Some(Utf8PathBuf::from(value));
        } else {
            config_args.push(argument);
        }
    }
    (descriptor, config_args)
}

async fn termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(source) => {
                error!(target: HEALTH_TARGET, error = %source, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!(target: HEALTH_TARGET, "termination signal received");
}
