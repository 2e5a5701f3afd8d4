use std::{collections::HashMap, sync::Arc};

use staffroom::{
    app::App,
    auth::FirebaseIdentity,
    config::Config,
    conversation::Notice,
    render,
    res::LOGIN_BANNER,
    session::View,
    store::SqliteStore,
    summarize::GeminiSummarizer,
    AppResult, Gateways,
};
use time::UtcOffset;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const HELP: &str = "type a message and press Enter to send
/important  toggle the important flag for the next message
/summarize  ask the AI for a summary of the last 20 messages
/logout     sign out
/quit       exit";

#[tokio::main]
async fn main() -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("staffroom=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
    let identity = FirebaseIdentity::new(
        config.load_clients()?,
        config.provider,
        config.callback_addr,
        config.sign_in_timeout,
    )
    .with_session_file(&config.session_path);
    let gateways = Gateways {
        identity: Arc::new(identity),
        messages: store.clone(),
        profiles: store,
        summarizer: Arc::new(GeminiSummarizer::new(config.gemini.clone())),
    };

    let (mut app, mut notices) = App::start(gateways);
    let mut screen = Screen::new(render::local_offset());
    screen.view(&app, app.view());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            view = app.session_changed() => {
                let Some(view) = view else { break };
                screen.view(&app, view);
            }
            Some(notice) = notices.recv() => screen.notice(&app, notice),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&mut app, &mut screen, &line) {
                    break;
                }
            }
        }
    }

    Ok(())
}

fn handle_line(app: &mut App, screen: &mut Screen, line: &str) -> bool {
    if line.trim() == "/quit" {
        return false;
    }

    match app.view() {
        View::Loading => {}
        View::Login { .. } => {
            if app.session().is_signing_in() {
                println!("Signing in...");
            } else {
                println!("Opening the sign-in window...");
                tokio::spawn(app.session().login_task());
            }
        }
        View::Chat if line.trim() == "/logout" => app.logout(),
        View::Chat => {
            let Some(conversation) = app.conversation() else {
                return true;
            };
            match line.trim() {
                "/help" => println!("{HELP}"),
                "/summarize" if conversation.is_summarizing() => println!("A summary is already on its way."),
                "/summarize" => {
                    println!("Summarizing...");
                    tokio::spawn(conversation.summary_task());
                }
                "/important" => {
                    let important = conversation.toggle_important();
                    println!("{}", if important { "Next message will be sent as important." } else { "Important flag cleared." });
                }
                _ => {
                    conversation.set_draft(line);
                    conversation.submit();
                }
            }
            screen.prompt(render::prompt(&conversation.composer()));
        }
    }
    true
}

/// Prints each message once, and again whenever its rendering changes.
struct Screen {
    offset: UtcOffset,
    printed: HashMap<String, String>,
}

impl Screen {
    fn new(offset: UtcOffset) -> Screen {
        Screen { offset, printed: HashMap::new() }
    }

    fn view(&mut self, app: &App, view: View) {
        match view {
            View::Loading => println!("Loading..."),
            View::Login { error } => {
                self.printed.clear();
                println!("\n{LOGIN_BANNER}");
                if let Some(error) = error {
                    println!("!! {error}");
                }
                println!("Press Enter to sign in (/quit to exit).");
            }
            View::Chat => {
                if let Some(conversation) = app.conversation() {
                    println!("\n{}\n{HELP}\n", render::header(conversation.user()));
                    self.messages(app);
                }
            }
        }
    }

    fn notice(&mut self, app: &App, notice: Notice) {
        match notice {
            Notice::ScrollToLatest => self.messages(app),
            Notice::Alert(text) => println!("!! {text}"),
            Notice::Summary(text) => println!("\n{}\n", render::summary(&text)),
        }
    }

    fn messages(&mut self, app: &App) {
        let Some(conversation) = app.conversation() else {
            return;
        };
        let me = &conversation.user().uid;
        for message in conversation.messages() {
            let line = render::message(&message, me, self.offset);
            if self.printed.get(&message.id) != Some(&line) {
                println!("{line}");
                self.printed.insert(message.id, line);
            }
        }
    }

    fn prompt(&self, prompt: &str) {
        use std::io::Write;
        print!("{prompt}");
        let _ = std::io::stdout().flush();
    }
}
