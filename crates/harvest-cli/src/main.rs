use std::fs::{self, File};
use std::path::PathBuf;
use std::{env, io};

use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use harvest::{Crawler, CrawlerConfig, Handler, LimitRule, Links, Response};
use tokio::runtime;

/// Polite web crawler saving every page it visits
#[derive(Debug, Parser)]
#[clap(version)]
pub struct Args {
    /// Seed URLs
    #[clap(required_unless_present = "completion")]
    pub urls: Vec<String>,
    /// Optional default crawler yaml configuration file
    #[clap(env = "HARVEST_CONFIG", parse(from_os_str), long)]
    pub config: Option<PathBuf>,
    /// Directory receiving the downloaded bodies
    #[clap(parse(from_os_str), long, short, default_value = ".")]
    pub output_dir: PathBuf,
    /// Override crawler's maximum link depth
    #[clap(long, short)]
    pub depth: Option<usize>,
    /// Override crawler's number of workers
    #[clap(long, short)]
    pub workers: Option<usize>,
    /// Seconds between two requests to the same host
    #[clap(long)]
    pub delay: Option<f32>,
    /// Random extra seconds added to the delay
    #[clap(long)]
    pub random_delay: Option<f32>,
    /// Override crawler's user agent
    #[clap(long)]
    pub user_agent: Option<String>,
    /// Proxy to rotate through, can be repeated
    #[clap(long = "proxy")]
    pub proxies: Vec<String>,
    /// No SIGINT handling, Ctrl-C kills the crawl without graceful shutdown
    #[clap(long)]
    pub no_sigint: bool,
    /// When quiet no logs are outputted
    #[clap(long, short)]
    pub quiet: bool,
    #[clap(long, hide = true)]
    pub completion: bool,
}

impl TryFrom<&Args> for CrawlerConfig {
    type Error = anyhow::Error;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let mut conf = if let Some(file) = args.config.as_ref().map(File::open) {
            serde_yaml::from_reader(file?)?
        } else {
            CrawlerConfig::default()
        };
        if let Some(depth) = args.depth {
            conf.max_depth = depth;
        }
        if let Some(workers) = args.workers {
            conf.num_workers = workers;
        }
        if let Some(user_agent) = &args.user_agent {
            conf.user_agent = Some(user_agent.to_string());
        }
        if !args.proxies.is_empty() {
            conf.proxies = args.proxies.clone();
        }
        if args.no_sigint {
            conf.handle_sigint = false;
        }
        // Flags win over the rules of the config file
        if args.delay.is_some() || args.random_delay.is_some() {
            let rule = LimitRule {
                domain_glob: "*".into(),
                parallelism: conf.num_workers,
                delay: args.delay.unwrap_or_default(),
                random_delay: args.random_delay.unwrap_or_default(),
            };
            conf.limits.insert(0, rule);
        }
        Ok(conf)
    }
}

/// Writes each successful body to `<last path segment>.<mime subtype>`.
#[derive(Debug)]
struct SaveToDisk {
    dir: PathBuf,
}

impl SaveToDisk {
    fn file_name(response: &Response) -> String {
        let stem = response
            .url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .unwrap_or("index");
        let ext = response
            .content_type()
            .and_then(|ct| {
                ct.split(|c: char| c == '/' || c == ';' || c.is_whitespace())
                    .nth(1)
            })
            .filter(|s| !s.is_empty())
            .unwrap_or("bin");
        format!("{stem}.{ext}")
    }
}

impl Handler for SaveToDisk {
    fn on_success(&self, response: &Response, _links: &mut Links) -> anyhow::Result<()> {
        let path = self.dir.join(Self::file_name(response));
        fs::write(&path, &response.body)?;
        log::info!("Saved {} to {}", response.url, path.display());
        Ok(())
    }
}

pub fn crawl(args: Args) -> anyhow::Result<()> {
    let conf = CrawlerConfig::try_from(&args)?;
    fs::create_dir_all(&args.output_dir)?;

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let stats = rt.block_on(async move {
        let crawler = Crawler::new(
            conf,
            SaveToDisk {
                dir: args.output_dir,
            },
        )?;
        crawler.submit_seeds(&args.urls)?;
        crawler.run().await
    })?;

    log::info!(
        "Crawl finished: {} completed, {} abandoned, {} attempts{}",
        stats.completed,
        stats.abandoned,
        stats.attempts,
        if stats.interrupted { " (interrupted)" } else { "" }
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.completion {
        generate(Shell::Bash, &mut Args::command(), "harvest", &mut io::stdout());
        return Ok(());
    }
    if !args.quiet {
        if env::var_os("RUST_LOG").is_none() {
            env::set_var("RUST_LOG", "harvest=info");
        }
        env_logger::init();
    }
    crawl(args)
}
