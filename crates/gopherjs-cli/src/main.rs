use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use gopherjs_core::ast::print_file;
use gopherjs_core::augment::parse_and_augment;
use gopherjs_core::config::CONFIG_FILE;
use gopherjs_core::{BuildConfig, BuildContext, Env, ListingFrontEnd, Options, Session};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gopherjs")]
#[command(about = "Build Go packages into JavaScript programs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile packages or a list of files
    Build {
        #[command(flatten)]
        flags: BuildFlags,

        /// Output file for the command being built
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Import paths, local directories or .go/.inc.js files
        targets: Vec<String>,
    },

    /// Compile commands and write them to the bin directory
    Install {
        #[command(flatten)]
        flags: BuildFlags,

        /// Import paths or local directories
        targets: Vec<String>,
    },

    /// Print the merged sources of a package
    Augment {
        /// Build tags to satisfy
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Include the package's test files
        #[arg(long)]
        test: bool,

        /// Import path or local directory
        package: String,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct BuildFlags {
    /// Print the names of packages as they are compiled
    #[arg(short, long)]
    verbose: bool,

    /// Suppress non-fatal warnings
    #[arg(short, long)]
    quiet: bool,

    /// Watch for changes to the source files and rebuild
    #[arg(short, long)]
    watch: bool,

    /// Minify generated code
    #[arg(short, long)]
    minify: bool,

    /// Build tags to satisfy
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,

    /// Ignore the on-disk build cache
    #[arg(long)]
    no_cache: bool,

    /// Write a source map next to the output
    #[arg(short, long)]
    source_map: bool,

    /// Keep local file paths in source maps
    #[arg(long)]
    map_to_local_disk: bool,

    /// Colour status messages
    #[arg(long)]
    color: bool,

    /// Configuration file (defaults to ./gopherjs.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl BuildFlags {
    /// Options from the configuration file with the flags applied on top.
    fn options(&self, config: Option<&BuildConfig>) -> Options {
        let mut options = config.map(BuildConfig::options).unwrap_or_default();
        options.verbose |= self.verbose;
        options.quiet |= self.quiet;
        options.watch |= self.watch;
        options.minify |= self.minify;
        options.no_cache |= self.no_cache;
        options.create_map_file |= self.source_map;
        options.map_to_local_disk |= self.map_to_local_disk;
        options.color |= self.color;
        if !self.tags.is_empty() {
            options.build_tags = self.tags.clone();
        }
        options
    }

    fn load_config(&self, cwd: &Path) -> Result<Option<BuildConfig>> {
        match &self.config {
            Some(path) => Ok(Some(BuildConfig::load(path)?)),
            None => BuildConfig::discover(cwd)
                .with_context(|| format!("failed to read {}", cwd.join(CONFIG_FILE).display())),
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let (verbose, quiet) = match &cli.command {
        Command::Build { flags, .. } | Command::Install { flags, .. } => {
            (flags.verbose || flags.watch, flags.quiet)
        }
        Command::Augment { .. } => (false, false),
    };
    init_tracing(verbose, quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    match cli.command {
        Command::Build {
            flags,
            output,
            targets,
        } => build(&flags, output, &targets, &cwd, false),
        Command::Install { flags, targets } => build(&flags, None, &targets, &cwd, true),
        Command::Augment {
            tags,
            test,
            package,
        } => augment(&package, tags, test, &cwd),
    }
}

fn build(
    flags: &BuildFlags,
    output: Option<PathBuf>,
    targets: &[String],
    cwd: &Path,
    install: bool,
) -> Result<()> {
    let config = flags.load_config(cwd)?;
    let options = flags.options(config.as_ref());
    let output = output
        .or_else(|| config.and_then(|c| c.output))
        .map(|p| if p.is_absolute() { p } else { cwd.join(p) });

    loop {
        let mut session = Session::new(options.clone(), Env::from_env(), Arc::new(ListingFrontEnd))?;
        let result = build_targets(&mut session, targets, output.as_deref(), cwd, install);
        if !options.watch {
            return result;
        }
        match result {
            Ok(()) => options.print_success("build succeeded\n"),
            Err(err) => options.print_error(&format!("{err:#}\n")),
        }
        session.wait_for_change();
    }
}

fn is_file_target(target: &str) -> bool {
    target.ends_with(".go") || target.ends_with(".inc.js")
}

fn build_targets(
    session: &mut Session,
    targets: &[String],
    output: Option<&Path>,
    cwd: &Path,
    install: bool,
) -> Result<()> {
    let targets: Vec<String> = if targets.is_empty() {
        vec![".".to_string()]
    } else {
        targets.to_vec()
    };

    if targets.iter().any(|t| is_file_target(t)) {
        if !targets.iter().all(|t| is_file_target(t)) {
            bail!("cannot mix files and packages");
        }
        if install {
            bail!("cannot install a list of files; use build");
        }
        let files: Vec<PathBuf> = targets.iter().map(PathBuf::from).collect();
        let out = match output {
            Some(out) => out.to_path_buf(),
            None => {
                let first = targets
                    .iter()
                    .find(|t| t.ends_with(".go"))
                    .unwrap_or(&targets[0]);
                let stem = Path::new(first)
                    .file_name()
                    .map(|n| n.to_string_lossy().trim_end_matches(".go").to_string())
                    .unwrap_or_else(|| "main".to_string());
                cwd.join(format!("{stem}.js"))
            }
        };
        session.build_files(&files, &out, cwd)?;
        info!(output = %out.display(), "wrote program");
        return Ok(());
    }

    if output.is_some() && targets.len() > 1 {
        bail!("-o cannot be used with multiple packages");
    }
    for target in &targets {
        let (pkg, archive) = session.build_import_path_with_src_dir(target, cwd)?;
        if !pkg.is_command() {
            continue;
        }
        let out = if install {
            pkg.install_path(session.context().env())
                .context("cannot determine install location")?
        } else {
            match output {
                Some(out) => out.to_path_buf(),
                None => {
                    let base = pkg.import_path.rsplit('/').next().unwrap_or(&pkg.import_path);
                    cwd.join(format!("{base}.js"))
                }
            }
        };
        session.write_command_package(&archive, &out)?;
        info!(package = %pkg.import_path, output = %out.display(), "wrote program");
    }
    Ok(())
}

fn augment(package: &str, tags: Vec<String>, test: bool, cwd: &Path) -> Result<()> {
    let ctx = BuildContext::new(Env::from_env(), "", tags);
    let pkg = ctx.import(package, cwd)?;
    let pkg = if test { pkg.test_package() } else { pkg };
    let (files, js_files) = parse_and_augment(&ctx, &pkg, test)?;
    for file in &files {
        println!("// {}", file.path.display());
        println!("{}", print_file(file));
    }
    for js in &js_files {
        println!("// {}", js.path.display());
        println!("{}", js.content);
    }
    Ok(())
}
