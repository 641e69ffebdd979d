use clap::{Args, Parser, Subcommand};
use mindmap_render::{
    Error, ImageFormat, RenderConfig, RenderOptions, Result, DEFAULT_ASSETS_DIR, DEFAULT_HEIGHT, DEFAULT_WIDTH,
};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "mindmap-render",
    version,
    about = "Render a markdown outline into a mind map image",
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Markdown file, or `-` for standard input
    #[arg(required = true)]
    input: Option<String>,

    /// Image file to write (parent directories are created)
    #[arg(required = true)]
    output: Option<PathBuf>,

    /// Image width in pixels (100-10000)
    width: Option<u32>,

    /// Image height in pixels (100-10000)
    height: Option<u32>,

    /// png or jpeg; defaults to the output file extension
    #[arg(long)]
    format: Option<ImageFormat>,

    /// Directory holding d3.min.js, markmap-view.js and optional fonts/
    #[arg(long)]
    assets_dir: Option<PathBuf>,

    /// Chrome or Chromium executable
    #[arg(long)]
    chrome: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the layout engine scripts into an asset directory
    FetchAssets {
        #[arg(long, default_value = DEFAULT_ASSETS_DIR)]
        dir: PathBuf,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run(cli) {
        eprintln!("Error ({}): {}", e.kind(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Command::FetchAssets { dir }) => fetch(&dir),
        None => render(cli.render),
    }
}

#[cfg(feature = "fetch")]
fn fetch(dir: &Path) -> Result<()> {
    let written = mindmap_render::assets::fetch_assets(dir, &mindmap_render::assets::default_sources())?;
    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}

#[cfg(not(feature = "fetch"))]
fn fetch(_dir: &Path) -> Result<()> {
    Err(Error::ConfigError(
        "this binary was built without the `fetch` feature".into(),
    ))
}

fn render(args: RenderArgs) -> Result<()> {
    let (Some(input), Some(output)) = (args.input, args.output) else {
        return Err(Error::ValidationError("INPUT and OUTPUT are required".into()));
    };

    let mut config = RenderConfig::from_env()?;
    if let Some(dir) = args.assets_dir {
        config.assets_dir = dir;
    }
    if let Some(chrome) = args.chrome {
        config.chrome_path = Some(chrome);
    }

    let text = read_input(&input)?;
    let options = RenderOptions {
        width: args.width.unwrap_or(DEFAULT_WIDTH),
        height: args.height.unwrap_or(DEFAULT_HEIGHT),
        format: args
            .format
            .or_else(|| ImageFormat::from_path(&output))
            .unwrap_or_default(),
    };

    let renderer = mindmap_render::new_renderer(config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::InitializationError(format!("Failed to start async runtime: {}", e)))?;

    let out = runtime.block_on(renderer.render(&text, Some(&output), options))?;
    if let Some(path) = out.path() {
        println!("{}", path.display());
    }
    Ok(())
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| Error::ValidationError(format!("cannot read standard input: {}", e)))?;
        return Ok(text);
    }
    std::fs::read_to_string(input).map_err(|e| Error::ValidationError(format!("cannot read {}: {}", input, e)))
}
