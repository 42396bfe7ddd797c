use super::*;

fn add_item(args: &[&str]) -> Result<Cli, clap::Error> {
    let mut argv = vec!["tools", "--database-url", "sqlite::memory:", "add-item", "L1", "Arrival"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv)
}

fn kind_of(cli: Cli) -> ItemKind {
    match cli.command {
        Command::AddItem { kind, .. } => kind.into(),
        other => panic!("expected add-item, got {other:?}"),
    }
}

#[test]
fn add_item_defaults_to_movie() {
    assert_eq!(kind_of(add_item(&[]).expect("parse")), ItemKind::Movie);
}

#[test]
fn add_item_accepts_known_kinds_in_any_case() {
    assert_eq!(kind_of(add_item(&["--kind", "tv"]).expect("parse")), ItemKind::Tv);
    assert_eq!(kind_of(add_item(&["--kind", "TV"]).expect("parse")), ItemKind::Tv);
}

#[test]
fn add_item_rejects_unknown_kinds() {
    let err = add_item(&["--kind", "documentary"]).expect_err("unknown kind");
    assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
}
