use super::load_config;
use autoload_core::{
    AutoLoader, FsBackendFactory, InProcessHost, LoadedModule, ModuleIdentity, ModuleLoader,
    ResolutionMultiplexer, ResolveRequest,
};
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Arguments of `autoload resolve`.
#[derive(Debug)]
pub struct ResolveArgs {
    pub identity: String,
    pub modules: Vec<PathBuf>,
    pub probes: Vec<PathBuf>,
    pub paths: Vec<PathBuf>,
    pub requester: Option<String>,
    pub config: Option<PathBuf>,
}

#[derive(Serialize)]
struct ModuleOutput {
    identity: String,
    handle: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<PathBuf>,
}

impl From<&LoadedModule> for ModuleOutput {
    fn from(module: &LoadedModule) -> Self {
        Self {
            identity: module.identity.to_string(),
            handle: module.handle.0,
            location: module.location.clone(),
        }
    }
}

#[derive(Serialize)]
struct RegisteredOutput {
    #[serde(flatten)]
    module: ModuleOutput,
    policy: bool,
    backends: usize,
    tracked: Vec<String>,
}

#[derive(Serialize)]
struct ResolveOutput {
    ok: bool,
    requested: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    requester: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved: Option<ModuleOutput>,
    registered: Vec<RegisteredOutput>,
    probing_paths: Vec<PathBuf>,
}

/// Run the resolve command. Exits with status 1 when nothing resolves.
pub fn run(args: &ResolveArgs, json: bool) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let requested: ModuleIdentity = args
        .identity
        .parse()
        .into_diagnostic()
        .wrap_err("invalid identity to resolve")?;
    let requester: Option<ModuleIdentity> = args
        .requester
        .as_deref()
        .map(str::parse::<ModuleIdentity>)
        .transpose()
        .into_diagnostic()
        .wrap_err("invalid --requester")?;

    let host = Arc::new(InProcessHost::new());
    let factory = Arc::new(FsBackendFactory::new(host.clone(), &config));
    let loader = AutoLoader::new(ResolutionMultiplexer::new(host.clone()), factory, &config);

    let mut loaded = Vec::with_capacity(args.modules.len());
    for path in &args.modules {
        let module = host
            .load(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to load module {}", path.display()))?;
        loader
            .add_module(module.handle, &args.probes)
            .into_diagnostic()?;
        debug!(module = %module.identity, "registered module");
        loaded.push(module);
    }
    for path in &args.paths {
        loader.add_probing_path(path).into_diagnostic()?;
    }

    let mut request = ResolveRequest::new(requested);
    if let Some(requester) = requester {
        request = request.from_requester(requester);
    }
    let resolved = host.resolve(&request);

    let registered = loaded
        .iter()
        .filter_map(|module| {
            let descriptor = loader.descriptor(module.handle)?;
            Some(RegisteredOutput {
                module: ModuleOutput::from(module),
                policy: descriptor.has_policy(),
                backends: descriptor.backend_count(),
                tracked: descriptor
                    .tracker()
                    .snapshot()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            })
        })
        .collect();

    let output = ResolveOutput {
        ok: resolved.is_some(),
        requested: request.requested.to_string(),
        requester: request.requester.as_ref().map(ToString::to_string),
        resolved: resolved.as_ref().map(ModuleOutput::from),
        registered,
        probing_paths: loader.probing_paths(),
    };

    if json {
        let json = serde_json::to_string_pretty(&output).into_diagnostic()?;
        println!("{json}");
    } else {
        print_human(&output);
    }

    if !output.ok {
        std::process::exit(1);
    }
    Ok(())
}

fn print_human(output: &ResolveOutput) {
    match &output.resolved {
        Some(module) => {
            print!("resolved {} -> {} ({})", output.requested, module.identity, module.handle);
            match &module.location {
                Some(location) => println!(" from {}", location.display()),
                None => println!(),
            }
        }
        None => println!("unresolved: {}", output.requested),
    }

    for registered in &output.registered {
        let policy = if registered.policy { ", redirect policy" } else { "" };
        println!(
            "  {} [{} backend(s){policy}]",
            registered.module.identity, registered.backends
        );
        for tracked in &registered.tracked {
            println!("    tracks {tracked}");
        }
    }
    for path in &output.probing_paths {
        println!("  path {}", path.display());
    }
}
