use std::{process, sync::Arc};

use boardsync::{
    application::{
        client::{BoardChanges, BoardDraft, PostDraft, PostListFilter, PostSort},
        error::AppError,
        feed::{FeedSync, LoadMore, Mutation},
    },
    cache::{CacheConfig, CacheEntry, CacheKey, EntryStatus},
    config::{self, BoardCommand, Command, CommentCommand, PostCommand, PostsArgs},
    domain::entities::Author,
    infra::{remote::HttpResourceClient, session::Session, telemetry},
    presentation::{Renderer, TextRenderer},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        eprintln!("{}: {error}", error.presentation_message());
        process::exit(i32::from(error.exit_code()));
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let session = Session::load(settings.api.token_file.as_deref())?;
    let client = HttpResourceClient::new(&settings.api, session)?;
    let viewer = resolve_viewer(&client).await;
    info!(base_url = %settings.api.base_url, "board client ready");

    let feed = FeedSync::new(Arc::new(client), CacheConfig::from(&settings.cache))
        .with_viewer(viewer);
    let renderer = TextRenderer;

    let result = dispatch(&feed, &renderer, cli_args.command).await;
    feed.teardown();

    let output = result?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

async fn resolve_viewer(client: &HttpResourceClient) -> Author {
    let anonymous = Author {
        id: 0,
        nickname: String::new(),
        is_admin: false,
    };
    if !client.session().is_authenticated() {
        return anonymous;
    }
    match client.current_user().await {
        Ok(author) => author,
        Err(err) => {
            warn!(error = %err, "could not resolve the signed-in user");
            anonymous
        }
    }
}

async fn dispatch(
    feed: &FeedSync,
    renderer: &TextRenderer,
    command: Command,
) -> Result<String, AppError> {
    match command {
        Command::Boards => {
            let entry = settled(feed.read(&CacheKey::board_list()).await)?;
            Ok(renderer.entry(&entry))
        }
        Command::Posts(args) => list_posts(feed, renderer, args).await,
        Command::Show(args) => {
            let detail_key = CacheKey::post_detail(args.post_id);
            let comments_key = CacheKey::comment_list(args.post_id);
            let (detail, comments) =
                futures::join!(feed.read(&detail_key), feed.read(&comments_key));
            let detail = settled(detail)?;
            let comments = settled(comments)?;
            Ok(format!(
                "{}\n\n{}",
                renderer.entry(&detail),
                renderer.entry(&comments)
            ))
        }
        Command::Like(args) => {
            let result = feed
                .mutate(Mutation::ToggleLike {
                    view: CacheKey::post_detail(args.post_id),
                    post_id: args.post_id,
                })
                .await?;
            Ok(renderer.mutation(&result))
        }
        Command::Comment(command) => {
            let mutation = match command {
                CommentCommand::Add {
                    post_id,
                    parent_id,
                    body,
                } => Mutation::CreateComment {
                    post_id,
                    parent_id,
                    body: non_empty("comment body", body)?,
                },
                CommentCommand::Edit {
                    post_id,
                    comment_id,
                    body,
                } => Mutation::EditComment {
                    post_id,
                    comment_id,
                    body: non_empty("comment body", body)?,
                },
                CommentCommand::Delete {
                    post_id,
                    comment_id,
                } => Mutation::DeleteComment {
                    post_id,
                    comment_id,
                },
            };
            Ok(renderer.mutation(&feed.mutate(mutation).await?))
        }
        Command::Post(command) => {
            let mutation = match command {
                PostCommand::Create { board, title, body } => Mutation::CreatePost {
                    board,
                    draft: post_draft(title, body)?,
                },
                PostCommand::Update {
                    post_id,
                    board,
                    title,
                    body,
                } => Mutation::UpdatePost {
                    post_id,
                    board,
                    draft: post_draft(title, body)?,
                },
                PostCommand::Delete { post_id, board } => Mutation::DeletePost { post_id, board },
            };
            Ok(renderer.mutation(&feed.mutate(mutation).await?))
        }
        Command::Board(command) => {
            let mutation = match command {
                BoardCommand::Create {
                    name,
                    slug,
                    description,
                } => Mutation::CreateBoard(BoardDraft {
                    name: non_empty("board name", name)?,
                    description,
                    slug: non_empty("board slug", slug)?,
                }),
                BoardCommand::Update {
                    id,
                    slug,
                    name,
                    description,
                    new_slug,
                } => Mutation::UpdateBoard {
                    id,
                    slug,
                    changes: BoardChanges {
                        name,
                        description,
                        slug: new_slug,
                    },
                },
                BoardCommand::Delete { id, slug } => Mutation::DeleteBoard { id, slug },
            };
            Ok(renderer.mutation(&feed.mutate(mutation).await?))
        }
    }
}

async fn list_posts(
    feed: &FeedSync,
    renderer: &TextRenderer,
    args: PostsArgs,
) -> Result<String, AppError> {
    let sort: PostSort = args.sort.parse()?;
    let filter = PostListFilter::new(sort, args.query.as_deref());
    let key = CacheKey::post_list(&args.board, &filter);

    let mut entry = settled(feed.read(&key).await)?;
    let mut notes = Vec::new();
    for _ in 1..args.pages.max(1) {
        let outcome = feed.load_more(&key).await?;
        notes.push(renderer.load_more(&outcome));
        if outcome == LoadMore::Exhausted {
            break;
        }
    }
    if let Some(latest) = feed.cache().peek(&key) {
        entry = latest;
    }

    let mut output = renderer.entry(&entry);
    for note in notes {
        output.push('\n');
        output.push_str(&note);
    }
    Ok(output)
}

fn settled(entry: CacheEntry) -> Result<CacheEntry, AppError> {
    match (entry.status, &entry.error) {
        (EntryStatus::Error, Some(err)) => Err(err.clone().into()),
        _ => Ok(entry),
    }
}

fn non_empty(field: &str, value: String) -> Result<String, AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{field} must not be empty")));
    }
    Ok(value)
}

fn post_draft(title: String, body: String) -> Result<PostDraft, AppError> {
    Ok(PostDraft {
        title: non_empty("post title", title)?,
        body_md: non_empty("post body", body)?,
    })
}
