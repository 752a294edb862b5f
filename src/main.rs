use anyhow::Result;
use clap::Parser;
use coinsage::config::{Config, LlmConfig};
use coinsage::gecko::GeckoClient;
use coinsage::history::Consultation;
use coinsage::llm::{LlmClient, Provider, StreamingLlmClient, TextModel};
use coinsage::media::MediaPipeline;
use coinsage::resolver;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

/// CLI override for LLM provider/model.
struct LlmOverride {
    provider: Provider,
    model: String,
}

fn make_llm_override(provider: Option<String>, model: Option<String>) -> Option<LlmOverride> {
    if provider.is_none() && model.is_none() {
        return None;
    }
    let provider = provider
        .map(|p| match p.as_str() {
            "anthropic" => Provider::Anthropic,
            "openai" => Provider::OpenAi,
            _ => Provider::OpenRouter,
        })
        .unwrap_or_default();
    let model = model.unwrap_or_else(|| match &provider {
        Provider::Anthropic => "claude-sonnet-4-5".into(),
        _ => "deepseek/deepseek-r1".into(),
    });
    Some(LlmOverride { provider, model })
}

/// Two model handles: one quiet (endpoint selection), one that may echo
/// streamed deltas to the terminal (answer phrasing).
struct Models {
    resolve: Box<dyn TextModel>,
    answer: Box<dyn TextModel>,
    /// The answer model already printed its text while streaming.
    answer_echoed: bool,
}

fn build_models(
    llm_config: &LlmConfig,
    llm_override: Option<&LlmOverride>,
    stream: bool,
) -> Result<Models> {
    let provider = llm_override
        .map(|o| o.provider.clone())
        .unwrap_or_else(|| llm_config.provider.clone());
    let model = llm_override
        .map(|o| o.model.clone())
        .unwrap_or_else(|| llm_config.model.clone());

    if stream {
        let resolve = StreamingLlmClient::from_config(
            provider.clone(),
            model.clone(),
            llm_config.max_tokens,
            llm_config.api_key_env.clone(),
            llm_config.base_url.clone(),
            false,
        )?;
        let answer = StreamingLlmClient::from_config(
            provider,
            model,
            llm_config.max_tokens,
            llm_config.api_key_env.clone(),
            llm_config.base_url.clone(),
            true,
        )?;
        Ok(Models {
            resolve: Box::new(resolve),
            answer: Box::new(answer),
            answer_echoed: true,
        })
    } else {
        let resolve = LlmClient::from_config(
            provider.clone(),
            model.clone(),
            llm_config.max_tokens,
            llm_config.api_key_env.clone(),
            llm_config.base_url.clone(),
        )?;
        let answer = LlmClient::from_config(
            provider,
            model,
            llm_config.max_tokens,
            llm_config.api_key_env.clone(),
            llm_config.base_url.clone(),
        )?;
        Ok(Models {
            resolve: Box::new(resolve),
            answer: Box::new(answer),
            answer_echoed: false,
        })
    }
}

#[derive(clap::Args)]
struct CommonOpts {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// LLM provider override: anthropic, openrouter, openai
    #[arg(long)]
    provider: Option<String>,

    /// LLM model override
    #[arg(long)]
    model: Option<String>,

    /// Stream the answer token by token
    #[arg(long)]
    stream: bool,

    /// Run the audio/video pipeline on the answer
    #[arg(long)]
    media: bool,

    /// Save the consultation to ~/.coinsage/history
    #[arg(long)]
    save: bool,
}

#[derive(Parser)]
#[command(
    name = "coinsage",
    about = "LLM-guided CoinGecko consultant — ask market questions in plain language"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Answer a single question and exit
    Ask {
        /// The market question, in any language
        question: String,

        #[command(flatten)]
        opts: CommonOpts,
    },

    /// Interactive loop: one question per line, 'sair' or 'exit' quits
    Chat {
        #[command(flatten)]
        opts: CommonOpts,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coinsage=info".parse().unwrap()),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Ask { question, opts } => {
            let ctx = Context::build(&opts)?;
            ctx.run_question(&question, &opts).await
        }
        Command::Chat { opts } => {
            let ctx = Context::build(&opts)?;
            ctx.run_chat(&opts).await
        }
    }
}

/// Everything one question needs, built once per process.
struct Context {
    config: Config,
    models: Models,
    gecko: GeckoClient,
}

impl Context {
    fn build(opts: &CommonOpts) -> Result<Self> {
        let config = Config::load_or_default(&opts.config)?;
        config.validate()?;

        let llm_override = make_llm_override(opts.provider.clone(), opts.model.clone());
        let models = build_models(&config.llm, llm_override.as_ref(), opts.stream)?;
        let gecko = GeckoClient::new(config.gecko.api_key.clone(), config.gecko.base_url.clone())?;

        Ok(Self {
            config,
            models,
            gecko,
        })
    }

    async fn run_question(&self, question: &str, opts: &CommonOpts) -> Result<()> {
        let data = resolver::resolve_market_data(
            question,
            self.models.resolve.as_ref(),
            &self.gecko,
            &self.config.resolver,
        )
        .await?;

        let Some(data) = data else {
            println!("😢 Couldn't get that information this time. Try another question!");
            return Ok(());
        };

        let answer =
            resolver::compose_answer(question, &data, self.models.answer.as_ref()).await?;
        if !self.models.answer_echoed {
            println!("\n✨ {answer}");
        }

        if opts.media || self.config.media.enabled {
            let pipeline = MediaPipeline::new(&self.config.media)?;
            let artifacts = pipeline.run(&answer).await;
            match (&artifacts.audio_path, &artifacts.video_path) {
                (Some(audio), Some(video)) => {
                    println!("🔊 {}  🎬 {}", audio.display(), video.display());
                }
                (Some(audio), None) => {
                    println!("🔊 {} (video unavailable, text only above)", audio.display());
                }
                (None, _) => println!("(audio unavailable, text only above)"),
            }
        }

        if opts.save || self.config.history.enabled {
            let path =
                Consultation::new(question, &answer).save(self.config.history.dir.as_ref())?;
            info!(path = %path.display(), "consultation saved");
        }

        Ok(())
    }

    async fn run_chat(&self, opts: &CommonOpts) -> Result<()> {
        println!("🚀 Welcome to the crypto consultant!");

        let stdin = std::io::stdin();
        loop {
            print!("🪙 What do you want to know about crypto? (or 'exit') 👉 ");
            std::io::stdout().flush()?;

            let mut line = String::new();
            if stdin.read_line(&mut line)? == 0 {
                break; // EOF
            }
            let question = line.trim();
            if question.is_empty() {
                continue;
            }
            if question.eq_ignore_ascii_case("sair") || question.eq_ignore_ascii_case("exit") {
                println!("👋 See you! Happy investing!");
                break;
            }

            self.run_question(question, opts).await?;
        }
        Ok(())
    }
}
