mod ui;

use comic_shelf::backend::api::{Book, PageList, ReadingProgress};
use comic_shelf::backend::LibraryClient;
use comic_shelf::config::Config;
use comic_shelf::reader::{
    BookContext, JumpOutcome, PageCache, PageDimensions, ProgressWrite, ReaderSession,
};
use image::DynamicImage;
use log::{error, info, warn};
use ui::ui::{App, View, ui};

use crossterm::{
    event::{Event, EventStream, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{error::Error, fs, io, time::Instant};
use tokio::sync::mpsc;

const SCROLL_STEP_ROWS: f64 = 3.0;

enum BackgroundTask {
    BooksLoaded { result: Result<Vec<Book>, String> },
    PagesLoaded { context: BookContext, result: Result<PageList, String> },
    ProgressLoaded { context: BookContext, result: Result<Option<ReadingProgress>, String> },
    PageImageLoaded { context: BookContext, page: u32, image: DynamicImage },
    PageImageFailed { context: BookContext, page: u32, message: String },
    ProgressSaved { context: BookContext, result: Result<(), String> },
}

/// Shared handles the background loaders need.
#[derive(Clone)]
struct Services {
    client: LibraryClient,
    cache: PageCache,
    tx: mpsc::UnboundedSender<BackgroundTask>,
}

fn init_logging() {
    let log_dir = dirs::cache_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("comic-shelf");
    fs::create_dir_all(&log_dir).ok();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Ok(file) = fs::File::create(log_dir.join("comic-shelf.log")) {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    let mut config = Config::load();
    info!("using library server {}", config.server_url);

    let client = LibraryClient::new(&config.server_url, config.api_token.clone())?;
    let cache = PageCache::new(
        Some(PageCache::default_dir()),
        config.memory_pages,
        config.disk_cache_mb,
    );

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();

    // Create channel for background tasks
    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<BackgroundTask>();
    let services = Services {
        client,
        cache,
        tx: task_tx,
    };

    app.set_loading(&format!("Connecting to {}...", config.server_url));
    terminal.draw(|f| ui(f, &mut app))?;

    match services.client.list_books().await {
        Ok(books) => app.set_books(books),
        Err(e) => {
            error!("book list failed: {}", e);
            app.library_error = Some(e.user_message());
        }
    }
    app.set_ready();

    let res = run_app(&mut terminal, &mut app, &mut task_rx, &services, &mut config).await;

    // Leaving mid-book must not lose the last position.
    if let Some(mut reader) = app.close_reader() {
        if let Some(write) = reader.session.close() {
            if let Err(e) = services.client.save_progress(&write.payload()).await {
                warn!("final progress write failed: {}", e);
            }
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("{err}");
    }
    Ok(())
}

fn spawn_books_loader(services: &Services) {
    let services = services.clone();
    tokio::spawn(async move {
        let result = services
            .client
            .list_books()
            .await
            .map_err(|e| e.user_message());
        let _ = services.tx.send(BackgroundTask::BooksLoaded { result });
    });
}

fn spawn_book_loaders(services: &Services, context: &BookContext) {
    let pages_services = services.clone();
    let pages_context = context.clone();
    tokio::spawn(async move {
        let result = match pages_services
            .client
            .get_pages(pages_context.book_id, Some(&pages_context.format), true)
            .await
        {
            Ok(Some(list)) => Ok(list),
            Ok(None) => Ok(PageList {
                total_pages: 0,
                pages: Vec::new(),
            }),
            Err(e) => Err(e.user_message()),
        };
        let _ = pages_services.tx.send(BackgroundTask::PagesLoaded {
            context: pages_context,
            result,
        });
    });

    let services = services.clone();
    let context = context.clone();
    tokio::spawn(async move {
        let result = services
            .client
            .get_progress(&context)
            .await
            .map_err(|e| e.user_message());
        let _ = services
            .tx
            .send(BackgroundTask::ProgressLoaded { context, result });
    });
}

fn spawn_page_image_loader(services: &Services, context: BookContext, page: u32) {
    let services = services.clone();
    tokio::spawn(async move {
        if let Some(image) = services.cache.get_page(&context, page).await {
            let _ = services
                .tx
                .send(BackgroundTask::PageImageLoaded { context, page, image });
            return;
        }
        if !services.cache.begin_load(&context, page).await {
            return;
        }
        match services.client.fetch_page_image(&context, page).await {
            Ok(image) => {
                services
                    .cache
                    .insert_page(&context, page, image.clone())
                    .await;
                let _ = services
                    .tx
                    .send(BackgroundTask::PageImageLoaded { context, page, image });
            }
            Err(e) => {
                let message = e.user_message();
                services
                    .cache
                    .mark_failed(&context, page, &message)
                    .await;
                let _ = services.tx.send(BackgroundTask::PageImageFailed {
                    context,
                    page,
                    message,
                });
            }
        }
    });
}

fn spawn_progress_writer(services: &Services, write: ProgressWrite) {
    let services = services.clone();
    tokio::spawn(async move {
        let result = services
            .client
            .save_progress(&write.payload())
            .await
            .map(|_| ())
            .map_err(|e| e.user_message());
        let _ = services.tx.send(BackgroundTask::ProgressSaved {
            context: write.context,
            result,
        });
    });
}

/// Requests the displayed and preload pages that are not loaded or in flight yet.
fn request_pages(app: &mut App, services: &Services) {
    let Some(reader) = app.reader.as_mut() else {
        return;
    };
    reader.evict_far_pages();

    let mut wanted = reader.session.displayed_pages();
    if reader.session.mode().is_scrolling() {
        wanted = reader
            .visible_items()
            .iter()
            .map(|item| item.index as u32 + 1)
            .collect();
    }
    wanted.extend(reader.session.preload_pages());

    let context = reader.session.context().clone();
    for page in wanted {
        if reader.image_states.contains_key(&page) || !reader.requested.insert(page) {
            continue;
        }
        spawn_page_image_loader(services, context.clone(), page);
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    task_rx: &mut mpsc::UnboundedReceiver<BackgroundTask>,
    services: &Services,
    config: &mut Config,
) -> io::Result<()> {
    let mut event_stream = EventStream::new();

    loop {
        let now = Instant::now();
        if let Some(reader) = app.reader.as_mut() {
            reader.sync_scroll(now);
            if let Some(write) = reader.session.tick(now) {
                spawn_progress_writer(services, write);
            }
        }

        terminal.draw(|f| ui(f, app))?;

        tokio::select! {
            // Timeout to drive the debounce and settle timers
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(50)) => {}

            // Handle keyboard events
            Some(Ok(event)) = event_stream.next() => {
                if let Event::Key(key) = event {
                    let typing = app.reader.as_ref().is_some_and(|r| r.jump_input.is_some());
                    if key.code == KeyCode::Char('q') && !typing {
                        return Ok(());
                    }

                    match app.view {
                        View::Library => {
                            handle_library_input(app, key.code, services, config).await
                        }
                        View::Reader => handle_reader_input(app, key.code, services, config),
                    }
                }
            }

            // Handle background task results
            Some(task) = task_rx.recv() => {
                handle_task(app, task, services);
            }
        }
    }
}

fn handle_task(app: &mut App, task: BackgroundTask, services: &Services) {
    let now = Instant::now();
    match task {
        BackgroundTask::BooksLoaded { result } => match result {
            Ok(books) => {
                app.library_error = None;
                app.set_books(books);
            }
            Err(message) => app.library_error = Some(message),
        },
        BackgroundTask::PagesLoaded { context, result } => {
            let Some(reader) = app.reader.as_mut() else {
                return;
            };
            match result {
                Ok(list) => reader.session.on_pages_loaded(&context, list, now),
                Err(message) => reader.session.on_pages_failed(&context, message),
            }
            request_pages(app, services);
        }
        BackgroundTask::ProgressLoaded { context, result } => {
            let Some(reader) = app.reader.as_mut() else {
                return;
            };
            let record = match result {
                Ok(record) => record,
                Err(message) => {
                    warn!("progress fetch for {} failed: {}", context, message);
                    app.status = Some(format!("Could not load reading position: {message}"));
                    None
                }
            };
            reader.session.on_progress_loaded(&context, record, now);
            request_pages(app, services);
        }
        BackgroundTask::PageImageLoaded { context, page, image } => {
            let picker = app.picker.as_ref();
            let Some(reader) = app.reader.as_mut() else {
                return;
            };
            if reader.session.context() != &context {
                return;
            }
            reader.session.on_page_dimensions(
                &context,
                page,
                PageDimensions::new(image.width(), image.height()),
            );
            if reader.session.displayed_pages().contains(&page) {
                reader.session.on_content_ready(now);
            }
            reader.add_page_image(picker, page, image);
            request_pages(app, services);
        }
        BackgroundTask::PageImageFailed { context, page, message } => {
            let Some(reader) = app.reader.as_mut() else {
                return;
            };
            if reader.session.context() != &context {
                return;
            }
            warn!("page {} of {} failed: {}", page, context, message);
            if reader.session.displayed_pages().contains(&page) {
                reader.session.on_content_ready(now);
            }
            reader.page_errors.insert(page, message);
        }
        BackgroundTask::ProgressSaved { context, result } => {
            if let Some(reader) = app.reader.as_mut() {
                reader.session.on_write_result(&context, result);
            }
        }
    }
}

async fn handle_library_input(app: &mut App, key: KeyCode, services: &Services, config: &Config) {
    match key {
        KeyCode::Up | KeyCode::Char('k') => app.select_previous_book(),
        KeyCode::Down | KeyCode::Char('j') => app.select_next_book(),
        KeyCode::Char('r') => spawn_books_loader(services),
        KeyCode::Enter => {
            if let Some(book) = app.selected_book().cloned() {
                open_book(app, &book, services, config).await;
            }
        }
        _ => {}
    }
}

async fn open_book(app: &mut App, book: &Book, services: &Services, config: &Config) {
    let context = book.context();
    info!("opening {} ({})", book.title, context);
    // Page loads for the new book are refused until the cache has switched over.
    services.cache.reset(&context).await;
    let session = ReaderSession::new(context.clone(), config.session_options());

    app.open_reader(session, book.title.clone());
    spawn_book_loaders(services, &context);
}

fn handle_reader_input(app: &mut App, key: KeyCode, services: &Services, config: &mut Config) {
    let now = Instant::now();
    let Some(reader) = app.reader.as_mut() else {
        return;
    };

    if let Some(input) = reader.jump_input.as_mut() {
        match key {
            KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => input.push(c),
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Enter => {
                if let Ok(percent) = input.parse::<f64>() {
                    if let JumpOutcome::ScrollTo(index) =
                        reader.session.jump_to_progress(percent / 100.0, now)
                    {
                        info!("jump scrolls to page {}", index + 1);
                    }
                }
                reader.jump_input = None;
            }
            KeyCode::Esc => reader.jump_input = None,
            _ => {}
        }
        request_pages(app, services);
        return;
    }

    let scrolling = reader.session.mode().is_scrolling();
    match key {
        KeyCode::Esc => {
            if let Some(mut reader) = app.close_reader() {
                if let Some(write) = reader.session.close() {
                    spawn_progress_writer(services, write);
                }
            }
            return;
        }
        KeyCode::Right | KeyCode::Char('l') | KeyCode::Char(' ') => {
            if scrolling {
                let page = reader.session.current_page() as i64 + 1;
                reader.session.go_to(page, now);
            } else {
                reader.session.next(now);
            }
        }
        KeyCode::Left | KeyCode::Char('h') => {
            if scrolling {
                let page = reader.session.current_page() as i64 - 1;
                reader.session.go_to(page, now);
            } else {
                reader.session.previous(now);
            }
        }
        KeyCode::Home => reader.session.first(now),
        KeyCode::End => reader.session.last(now),
        KeyCode::Down | KeyCode::Char('j') if scrolling => reader.scroll_by(SCROLL_STEP_ROWS, now),
        KeyCode::Up | KeyCode::Char('k') if scrolling => reader.scroll_by(-SCROLL_STEP_ROWS, now),
        KeyCode::PageDown if scrolling => {
            let rows = reader.viewport.height as f64;
            reader.scroll_by(rows, now);
        }
        KeyCode::PageUp if scrolling => {
            let rows = reader.viewport.height as f64;
            reader.scroll_by(-rows, now);
        }
        KeyCode::Char('g') => reader.jump_input = Some(String::new()),
        KeyCode::Char('m') => {
            let mode = reader.session.mode().cycle();
            reader.session.set_mode(mode);
            config.reading_mode = mode;
            config.save();
        }
        KeyCode::Char('s') => {
            let enabled = !reader.session.spread_enabled();
            reader.session.set_spread_enabled(enabled);
            config.spread_mode = enabled;
            config.save();
        }
        _ => {}
    }

    request_pages(app, services);
}
