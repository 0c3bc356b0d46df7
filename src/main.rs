use std::io::Write;

use deepthought::config::Config;
use deepthought::error::RelayError;
use deepthought::provider::{AnswerMode, ReasoningMode};
use deepthought::relay::{
    AnswerSelection, DEFAULT_ANSWER_MAX_TOKENS, DEFAULT_ANSWER_MODEL, DEFAULT_LOCAL_ANSWER_MODEL,
    DEFAULT_LOCAL_REASONING_MODEL, DEFAULT_REASONING_MODEL, Relay, RequestSpec,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    let reasoning_mode: ReasoningMode = mode_from_env("DEEPTHOUGHT_REASONING", "cloud")?;
    let answer_mode: AnswerMode = mode_from_env("DEEPTHOUGHT_ANSWER", "anthropic")?;

    let reasoning_model = std::env::var("DEEPTHOUGHT_REASONING_MODEL").unwrap_or_else(|_| {
        match reasoning_mode {
            ReasoningMode::Cloud => DEFAULT_REASONING_MODEL.to_string(),
            ReasoningMode::Local => DEFAULT_LOCAL_REASONING_MODEL.to_string(),
        }
    });
    let answer_model = std::env::var("DEEPTHOUGHT_ANSWER_MODEL").unwrap_or_else(|_| {
        match answer_mode {
            AnswerMode::Anthropic => DEFAULT_ANSWER_MODEL.to_string(),
            AnswerMode::Local => DEFAULT_LOCAL_ANSWER_MODEL.to_string(),
        }
    });

    let question = read_question()?;

    let config = Config::load();
    let relay = Relay::new(&config);

    let spec = RequestSpec {
        mode: reasoning_mode,
        prompt: question,
        model: reasoning_model,
        temperature: None,
        max_tokens: None,
        include_reasoning: true,
    };
    let selection = AnswerSelection {
        mode: answer_mode,
        model: answer_model,
        max_tokens: DEFAULT_ANSWER_MAX_TOKENS,
    };

    match relay.run(&spec, &selection).await {
        Ok(outcome) => {
            if outcome.partial {
                eprintln!("warning: reasoning stream was cut short; answer is based on partial reasoning");
            }
            println!("--- Reasoning ({:?}) ---", outcome.reasoning.origin);
            println!("{}\n", outcome.reasoning.text);
            println!("--- Final Answer ---");
            println!("{}", outcome.answer);
            Ok(())
        }
        Err(RelayError::FinalAnswer { message, reasoning }) => {
            // The reasoning still has value on its own.
            println!("--- Reasoning ({:?}) ---", reasoning.origin);
            println!("{}\n", reasoning.text);
            eprintln!("error: final answer call failed: {message}");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("error: {}", err.user_message());
            std::process::exit(1);
        }
    }
}

fn mode_from_env<T>(var: &str, default: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    std::env::var(var)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e| anyhow::anyhow!("{var}: {e}"))
}

fn read_question() -> anyhow::Result<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return Ok(args.join(" "));
    }

    print!("Enter your question: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let question = line.trim().to_string();
    if question.is_empty() {
        anyhow::bail!("no question provided");
    }
    Ok(question)
}
