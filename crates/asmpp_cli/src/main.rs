use std::io::{self, Read, Write};
use std::path::PathBuf;

use asmpp_core::{
    CounterScope, DefineTable, Dialect, Preprocessor, RewriteOptions, Rewritten, ScopeMarkers,
    UnbalancedClose,
};
use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "asmpp")]
#[command(about = "Scope-aware macro preprocessor for assembly source")]
#[command(version)]
struct Cli {
    /// Files to rewrite, in order. Reads standard input when empty.
    files: Vec<PathBuf>,

    #[arg(long, value_enum, default_value_t = MarkerStyle::Cpp)]
    markers: MarkerStyle,

    /// Do not emit `# LINE "FILE"` after scope prologues and epilogues.
    #[arg(long)]
    no_line_markers: bool,

    /// Treat a `}` with no open scope as an error.
    #[arg(long)]
    strict_braces: bool,

    /// Number anonymous scopes across all files instead of per file.
    #[arg(long)]
    global_anon_counter: bool,

    #[arg(long, value_name = "SEP", default_value = "$")]
    separator: String,

    /// Value for a `` `NAME` `` escape.
    #[arg(short = 'D', long = "define", value_name = "NAME=VALUE", value_parser = parse_define)]
    defines: Vec<(String, String)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum MarkerStyle {
    Cpp,
    Fn,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    std::process::exit(run(cli));
}

/// Installs a stderr subscriber only when `RUST_LOG` asks for one.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn run(cli: Cli) -> i32 {
    let options = options_from_cli(&cli);
    let defines: DefineTable = cli.defines.into_iter().collect();
    let mut preprocessor = Preprocessor::new(options).with_evaluator(defines);

    let mut stdout = io::stdout().lock();
    if cli.files.is_empty() {
        let mut text = String::new();
        if let Err(err) = io::stdin().read_to_string(&mut text) {
            eprintln!("error: failed to read standard input: {err}");
            return 1;
        }
        let result = preprocessor.rewrite_named_text("<stdin>", text);
        return match emit(&mut stdout, result) {
            Emitted::Ok | Emitted::PipeClosed => 0,
            Emitted::Failed => 1,
        };
    }

    let mut exit_code = 0;
    for path in &cli.files {
        let result = preprocessor.rewrite_path(path);
        match emit(&mut stdout, result) {
            Emitted::Ok => {}
            Emitted::Failed => exit_code = 1,
            Emitted::PipeClosed => {
                tracing::debug!("stdout closed, stopping");
                break;
            }
        }
    }

    exit_code
}

enum Emitted {
    Ok,
    Failed,
    PipeClosed,
}

fn emit(out: &mut impl Write, result: Result<Rewritten, Vec<asmpp_core::Diag>>) -> Emitted {
    let Ok(rewritten) = result else {
        return Emitted::Failed;
    };

    match out
        .write_all(rewritten.text.as_bytes())
        .and_then(|()| out.flush())
    {
        Ok(()) => Emitted::Ok,
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Emitted::PipeClosed,
        Err(err) => {
            eprintln!("error: failed to write output: {err}");
            Emitted::Failed
        }
    }
}

fn options_from_cli(cli: &Cli) -> RewriteOptions {
    let markers = match cli.markers {
        MarkerStyle::Cpp => ScopeMarkers::Cpp,
        MarkerStyle::Fn => ScopeMarkers::Fn,
    };

    RewriteOptions {
        dialect: Dialect {
            scope_separator: cli.separator.clone(),
            markers,
            ..Dialect::default()
        },
        line_markers: !cli.no_line_markers,
        unbalanced_close: if cli.strict_braces {
            UnbalancedClose::Error
        } else {
            UnbalancedClose::Ignore
        },
        anon_counter: if cli.global_anon_counter {
            CounterScope::PerBatch
        } else {
            CounterScope::PerFile
        },
    }
}

fn parse_define(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    if name.is_empty() {
        return Err(format!("missing name in `{raw}`"));
    }
    Ok((name.to_string(), value.to_string()))
}
