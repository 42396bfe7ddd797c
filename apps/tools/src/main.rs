use anyhow::Result;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use shared::{
    domain::{ItemKind, ListId, UserId},
    protocol::NewItem,
};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/watchlist.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum KindArg {
    Movie,
    Tv,
}

impl From<KindArg> for ItemKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Movie => ItemKind::Movie,
            KindArg::Tv => ItemKind::Tv,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        name: String,
        email: String,
    },
    CreateSession {
        user_id: String,
        #[arg(long, default_value_t = 30)]
        valid_days: i64,
    },
    CreateList {
        owner_user_id: String,
        name: String,
    },
    GrantAccess {
        list_id: String,
        user_id: String,
    },
    AddItem {
        list_id: String,
        title: String,
        #[arg(long, value_enum, ignore_case = true, default_value_t = KindArg::Movie)]
        kind: KindArg,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,
        #[arg(long)]
        duration: Option<i64>,
        #[arg(long)]
        rating: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser { name, email } => {
            let user_id = storage.create_user(&name, &email).await?;
            println!("created user_id={user_id}");
        }
        Command::CreateSession {
            user_id,
            valid_days,
        } => {
            let valid_until = Utc::now() + Duration::days(valid_days);
            let session_id = storage
                .create_session(&UserId::new(user_id), valid_until)
                .await?;
            println!("created session_id={session_id} valid_until={}", valid_until.to_rfc3339());
        }
        Command::CreateList {
            owner_user_id,
            name,
        } => {
            let list_id = storage
                .create_list(&name, &UserId::new(owner_user_id))
                .await?;
            println!("created list_id={list_id}");
        }
        Command::GrantAccess { list_id, user_id } => {
            storage
                .grant_list_access(&ListId::new(list_id.as_str()), &UserId::new(user_id.as_str()))
                .await?;
            println!("granted user_id={user_id} access to list_id={list_id}");
        }
        Command::AddItem {
            list_id,
            title,
            kind,
            priority,
            duration,
            rating,
        } => {
            let item = NewItem {
                kind: kind.into(),
                priority,
                duration,
                rating,
                ..NewItem::titled(title)
            };
            let created = storage.insert_item(&ListId::new(list_id), &item).await?;
            println!("created item_id={} title={}", created.id, created.title);
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
