//! warden CLI — compile and execute sandboxed agent scripts.

use clap::{Parser as ClapParser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use warden_provider_fs::FsSandbox;
use warden_provider_http::HttpSandbox;
use warden_vm::bytecode::scopes;
use warden_vm::{AllowListGatekeeper, Machine};

const DEFAULT_GAS: u64 = 1_000_000;
const DEFAULT_MAX_FILE_BYTES: usize = 5 * 1024 * 1024;

#[derive(ClapParser)]
#[command(
    name = "warden",
    version,
    about = "Capability-gated VM for untrusted agent scripts",
    long_about = "Compiles a restricted scripting language and executes it inside a \
                  gas-metered VM. Filesystem access is jailed under a root directory; \
                  HTTP access is limited to an explicit domain allowlist. Both require \
                  the script to open the matching capability scope with a valid token."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a script file
    Run {
        /// Path to the script
        file: PathBuf,

        /// Instruction budget for the run
        #[arg(long, default_value_t = DEFAULT_GAS)]
        gas: u64,

        /// Sandbox root for file operations (default: current directory)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Domain the script may fetch from (repeatable)
        #[arg(long = "allow-domain")]
        allow_domains: Vec<String>,

        /// Allow requests to localhost/private addresses
        #[arg(long)]
        allow_loopback: bool,

        /// Capability token accepted by the gatekeeper
        #[arg(long, default_value = "token")]
        token: String,
    },
    /// Fetch a URL through the HTTP sandbox and print the body
    Query {
        /// Target URL
        url: String,

        /// Capability token for the HTTP scope
        token: Option<String>,
    },
}

fn main() -> ExitCode {
    match Cli::parse().command {
        Commands::Run {
            file,
            gas,
            root,
            allow_domains,
            allow_loopback,
            token,
        } => {
            let source = match std::fs::read_to_string(&file) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("error reading {}: {}", file.display(), e);
                    return ExitCode::FAILURE;
                }
            };
            let root = root
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_else(|| PathBuf::from("."));
            execute(&source, gas, root, allow_domains, allow_loopback, &token)
        }
        Commands::Query { url, token } => {
            let token = token.unwrap_or_else(|| "token".to_string());
            let source = format!(
                "with scope(\"{}\", \"{}\"):\n    print(fetch(\"{}\"))\n",
                scopes::HTTP_ENV,
                token,
                url
            );
            let domain = url
                .split("//")
                .nth(1)
                .and_then(|rest| rest.split(['/', ':']).next())
                .unwrap_or_default()
                .to_string();
            let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            execute(&source, DEFAULT_GAS, root, vec![domain], true, &token)
        }
    }
}

fn execute(
    source: &str,
    gas: u64,
    root: PathBuf,
    allow_domains: Vec<String>,
    allow_loopback: bool,
    token: &str,
) -> ExitCode {
    let program = match warden_compiler::compile(source) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("compilation error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut m = Machine::new();
    warden_stdlib::install(&mut m);
    warden_provider_fs::install(FsSandbox::new(root, DEFAULT_MAX_FILE_BYTES), &mut m);
    warden_provider_http::install(
        HttpSandbox::new(allow_domains).allow_loopback(allow_loopback),
        &mut m,
    );
    m.set_gatekeeper(Box::new(
        AllowListGatekeeper::new()
            .allow(scopes::FS_ENV, token)
            .allow(scopes::HTTP_ENV, token),
    ));
    m.load(&program);

    match m.run(gas) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("runtime error: {}", e);
            ExitCode::FAILURE
        }
    }
}
