use std::io::Write as _;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use marketsync::config::{api_host, Config, ConfigNeedsInput, CredentialBackend, FileConfig};
use marketsync::core::api::HttpApi;
use marketsync::core::keyring;
use marketsync::core::models::{ConversationId, ListKind, Role};
use marketsync::{NoticeLevel, SyncEngine};

type Input = Lines<BufReader<Stdin>>;

const HELP: &str = "\
commands:
  list | archived        show active / archived conversations
  open <id>              open a conversation
  close                  close the open conversation
  refresh                re-fetch the open conversation
  reload                 reload both conversation lists
  send <text>            send to the open conversation
  archive [id]           archive (defaults to the open conversation)
  unarchive [id]
  delete [id]            asks for confirmation
  yes | no               confirm or cancel a pending delete
  forget                 remove the stored access token and quit
  help | quit";

enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let config = match Config::resolve() {
        Ok(config) => config,
        Err(ConfigNeedsInput::CredentialOnly {
            api_url,
            account,
            role,
            error,
        }) => {
            if let Some(e) = error {
                eprintln!("{e}");
            }
            let host = api_host(&api_url);
            let token = prompt(&mut input, &format!("Access token for {account}@{host}")).await?;
            if let Err(e) = keyring::set_credential(&account, &host, &token) {
                log::warn!("Could not store credential in keyring: {}", e);
            }
            let fc = FileConfig::load()
                .map_err(anyhow::Error::msg)?
                .context("config file disappeared")?;
            Config::from_file_config(&fc, token)
        }
        Err(ConfigNeedsInput::FullSetup) => setup(&mut input).await?,
    };

    let api = HttpApi::new(config.http_config().map_err(anyhow::Error::msg)?)?;
    log::info!("Using {} as {:?}", config.api_url, config.role);

    let mut engine = SyncEngine::create(Arc::new(api), config.engine_config());
    engine.load_lists();
    let mut kind = ListKind::Active;
    println!("{HELP}");

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else { break };
                match run(&mut engine, &config, &mut kind, line.trim()) {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            event = engine.next_event() => {
                let Some(event) = event else { break };
                engine.update(event);
                render(&mut engine);
            }
        }
    }

    engine.dispose();
    Ok(())
}

/// First run: ask for connection details and write the config file.
async fn setup(input: &mut Input) -> anyhow::Result<Config> {
    println!("No configuration found (MARKETSYNC_API_URL / MARKETSYNC_TOKEN unset).");
    let api_url = prompt(input, "API base URL").await?;
    let account = prompt(input, "Account name").await?;
    let role: Role = prompt(input, "Role (client/provider)")
        .await?
        .parse()
        .map_err(anyhow::Error::msg)?;
    let token = prompt(input, "Access token").await?;

    let credential = match keyring::set_credential(&account, &api_host(&api_url), &token) {
        Ok(()) => CredentialBackend::Keyring,
        Err(e) => {
            log::warn!("Keyring unavailable ({}), storing credential in config file", e);
            CredentialBackend::Plaintext {
                value: token.clone(),
            }
        }
    };
    let fc = FileConfig {
        api_url,
        account,
        role,
        credential,
        debounce_ms: None,
        read_retries: None,
        timeout_secs: None,
    };
    fc.save().map_err(anyhow::Error::msg)?;
    Ok(Config::from_file_config(&fc, token))
}

async fn prompt(input: &mut Input, label: &str) -> anyhow::Result<String> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    let line = input.next_line().await?.context("input closed")?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("{label} is required");
    }
    Ok(value)
}

fn run(
    engine: &mut SyncEngine,
    config: &Config,
    kind: &mut ListKind,
    line: &str,
) -> anyhow::Result<Flow> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "" => {}
        "help" => println!("{HELP}"),
        "quit" | "exit" => return Ok(Flow::Quit),
        "list" => {
            *kind = ListKind::Active;
            print_list(engine, *kind);
        }
        "archived" => {
            *kind = ListKind::Archived;
            print_list(engine, *kind);
        }
        "reload" => engine.load_lists(),
        "open" => {
            engine.select(parse_id(rest)?)?;
            print_thread(engine);
        }
        "close" => engine.deselect(),
        "refresh" => engine.refresh()?,
        "send" => {
            let id = target(engine, "")?;
            engine.send(id, rest)?;
        }
        "archive" => engine.archive(target(engine, rest)?)?,
        "unarchive" => engine.unarchive(target(engine, rest)?)?,
        "delete" => {
            let id = target(engine, rest)?;
            engine.request_delete(id)?;
            println!("Delete conversation {id}? (yes/no)");
        }
        "yes" => {
            engine.confirm_delete()?;
        }
        "no" => engine.cancel_delete(),
        "forget" => {
            if keyring::delete_credential(&config.account, &api_host(&config.api_url))? {
                println!("Access token removed; you will be asked for it on next start.");
            } else {
                println!("No access token was stored in the keyring.");
            }
            return Ok(Flow::Quit);
        }
        other => bail!("unknown command {other:?}, try `help`"),
    }
    Ok(Flow::Continue)
}

fn parse_id(arg: &str) -> anyhow::Result<ConversationId> {
    arg.parse()
        .with_context(|| format!("expected a conversation id, got {arg:?}"))
}

/// Explicit id, else the open conversation.
fn target(engine: &SyncEngine, arg: &str) -> anyhow::Result<ConversationId> {
    if arg.is_empty() {
        engine.selected().context("no conversation is open")
    } else {
        parse_id(arg)
    }
}

fn render(engine: &mut SyncEngine) {
    for notice in engine.take_notices() {
        match notice.level {
            NoticeLevel::Info => println!("* {}", notice.text),
            NoticeLevel::Error => eprintln!("! {}", notice.text),
        }
    }
    if engine.take_scroll_request() {
        print_thread(engine);
    }
}

fn print_list(engine: &SyncEngine, kind: ListKind) {
    let rows = engine.conversation_views(kind);
    if rows.is_empty() {
        println!("  (no conversations)");
        return;
    }
    for row in rows {
        let marker = if row.selected { '>' } else { ' ' };
        let unread = match row.unread_count {
            0 => String::new(),
            n => format!(" ({n})"),
        };
        println!("{marker} {:>6}  {}{unread}  {}", row.id, row.title, row.preview);
    }
}

fn print_thread(engine: &SyncEngine) {
    let Some(thread) = engine.thread_view() else {
        return;
    };
    println!("== {} ==", thread.conversation.title);
    for m in &thread.messages {
        let who = if m.own {
            "you"
        } else {
            thread.conversation.title.as_str()
        };
        println!(
            "  [{}] {}: {}",
            m.message.created_at.format("%Y-%m-%d %H:%M"),
            who,
            m.message.content
        );
    }
    if thread.loading {
        println!("  (loading)");
    }
    if thread.sending {
        println!("  (sending)");
    }
    if thread.can_unarchive {
        println!("  archived; `unarchive` to reply");
    }
}
