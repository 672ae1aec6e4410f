use image::DynamicImage;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph},
    Frame,
};
use ratatui_image::{picker::Picker, protocol::StatefulProtocol, Resize, StatefulImage};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use comic_shelf::backend::api::Book;
use comic_shelf::reader::context::is_comic_format;
use comic_shelf::reader::virtual_list::{VirtualItem, VirtualList};
use comic_shelf::reader::{LoadState, ReaderSession, ReadingMode};

/// Terminal cells are roughly twice as tall as they are wide.
const CELL_ASPECT: f64 = 2.0;
const PAGE_GAP_ROWS: f64 = 1.0;
/// Loaded page images kept as terminal protocols on either side of the current page.
const KEEP_AROUND: u32 = 8;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Library,
    Reader,
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    Loading,
    Ready,
}

pub struct ReaderView {
    pub session: ReaderSession,
    pub title: String,
    pub image_states: HashMap<u32, StatefulProtocol>,
    pub page_errors: HashMap<u32, String>,
    pub requested: HashSet<u32>,
    pub scroll_top: f64,
    pub viewport: Rect,
    pub jump_input: Option<String>,
}

impl ReaderView {
    pub fn new(session: ReaderSession, title: String) -> Self {
        Self {
            session,
            title,
            image_states: HashMap::new(),
            page_errors: HashMap::new(),
            requested: HashSet::new(),
            scroll_top: 0.0,
            viewport: Rect::default(),
            jump_input: None,
        }
    }

    fn page_rows(&self, page: u32) -> f64 {
        let width = self.viewport.width.max(1) as f64;
        match self.session.page_dimensions(page) {
            Some(dims) => (width * dims.aspect() / CELL_ASPECT).max(1.0).round(),
            None => self.viewport.height.max(1) as f64,
        }
    }

    /// Vertical layout of every page for the scrolling modes, in terminal rows.
    pub fn layout(&self) -> VirtualList {
        let heights = (1..=self.session.total_pages()).map(|page| self.page_rows(page));
        VirtualList::new(heights, PAGE_GAP_ROWS, 1)
    }

    pub fn visible_items(&self) -> Vec<VirtualItem> {
        self.layout()
            .visible_items(self.scroll_top, self.viewport.height as f64)
    }

    /// Applies pending scroll-to-page requests and reports the scroll position.
    pub fn sync_scroll(&mut self, now: Instant) {
        if !self.session.mode().is_scrolling() || self.viewport.height == 0 {
            return;
        }
        let layout = self.layout();
        if let Some(index) = self.session.take_scroll_request() {
            self.scroll_top = layout.offset_of(index);
        }
        self.scroll_top = self
            .scroll_top
            .clamp(0.0, layout.max_scroll(self.viewport.height as f64));
        let items = layout.visible_items(self.scroll_top, self.viewport.height as f64);
        self.session
            .on_scroll(self.scroll_top, self.viewport.height as f64, &items, now);
    }

    pub fn scroll_by(&mut self, rows: f64, now: Instant) {
        self.scroll_top = (self.scroll_top + rows).max(0.0);
        self.sync_scroll(now);
    }

    pub fn add_page_image(&mut self, picker: Option<&Picker>, page: u32, image: DynamicImage) {
        self.page_errors.remove(&page);
        if let Some(picker) = picker {
            let protocol = picker.new_resize_protocol(image);
            self.image_states.insert(page, protocol);
        }
    }

    /// Drops terminal images far from the current page; they reload from the page cache.
    pub fn evict_far_pages(&mut self) {
        let current = self.session.current_page();
        let near = |page: &u32| page.abs_diff(current) <= KEEP_AROUND;
        self.image_states.retain(|page, _| near(page));
        self.requested.retain(near);
    }
}

pub struct App {
    pub state: AppState,
    pub loading_message: String,
    pub view: View,
    pub books: Vec<Book>,
    pub book_list_state: ListState,
    pub library_error: Option<String>,
    pub picker: Option<Picker>,
    pub reader: Option<ReaderView>,
    pub status: Option<String>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        let picker = Picker::from_query_stdio().ok();

        Self {
            state: AppState::Loading,
            loading_message: "Initializing...".to_string(),
            view: View::Library,
            books: Vec::new(),
            book_list_state: ListState::default(),
            library_error: None,
            picker,
            reader: None,
            status: None,
        }
    }

    pub fn set_loading(&mut self, message: &str) {
        self.state = AppState::Loading;
        self.loading_message = message.to_string();
    }

    pub fn set_ready(&mut self) {
        self.state = AppState::Ready;
    }

    pub fn set_books(&mut self, books: Vec<Book>) {
        self.books = books
            .into_iter()
            .filter(|book| is_comic_format(&book.format))
            .collect();
        let selected = if self.books.is_empty() { None } else { Some(0) };
        self.book_list_state.select(selected);
    }

    pub fn selected_book(&self) -> Option<&Book> {
        self.book_list_state
            .selected()
            .and_then(|index| self.books.get(index))
    }

    pub fn select_next_book(&mut self) {
        let selected = self.book_list_state.selected().unwrap_or(0);
        if selected + 1 < self.books.len() {
            self.book_list_state.select(Some(selected + 1));
        }
    }

    pub fn select_previous_book(&mut self) {
        let selected = self.book_list_state.selected().unwrap_or(0);
        if selected > 0 {
            self.book_list_state.select(Some(selected - 1));
        }
    }

    pub fn open_reader(&mut self, session: ReaderSession, title: String) {
        self.reader = Some(ReaderView::new(session, title));
        self.view = View::Reader;
        self.status = None;
    }

    pub fn close_reader(&mut self) -> Option<ReaderView> {
        self.view = View::Library;
        self.reader.take()
    }
}

pub fn ui(f: &mut Frame, app: &mut App) {
    match app.state {
        AppState::Loading => draw_loading_screen(f, app),
        AppState::Ready => match app.view {
            View::Library => draw_library(f, app),
            View::Reader => draw_reader(f, app),
        },
    }
}

fn draw_loading_screen(f: &mut Frame, app: &App) {
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Comic Shelf")
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let center_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Percentage(40),
        ])
        .split(inner);

    let loading_text = Line::from(Span::styled(
        "Loading...",
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    ));
    let loading_paragraph = Paragraph::new(loading_text).alignment(Alignment::Center);
    f.render_widget(loading_paragraph, center_layout[1]);

    let message = Paragraph::new(&*app.loading_message)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(message, center_layout[2]);
}

fn draw_library(f: &mut Frame, app: &mut App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(3)])
        .split(f.area());

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Comic Shelf")
        .border_style(Style::default().fg(Color::Cyan));

    if let Some(error) = &app.library_error {
        let p = Paragraph::new(format!("Error: {error}"))
            .style(Style::default().fg(Color::Red))
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(p, root[0]);
    } else if app.books.is_empty() {
        let p = Paragraph::new("No comics in the library")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(p, root[0]);
    } else {
        let items: Vec<ListItem> = app
            .books
            .iter()
            .map(|book| ListItem::new(book_line(book)))
            .collect();

        let list = List::new(items)
            .block(block)
            .highlight_style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");
        f.render_stateful_widget(list, root[0], &mut app.book_list_state);
    }

    draw_footer(
        f,
        root[1],
        &[("↑/↓", "select"), ("Enter", "read"), ("r", "refresh"), ("q", "quit")],
    );
}

fn book_line(book: &Book) -> Line<'static> {
    let mut spans = vec![
        Span::styled(
            book.title.clone(),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  [{}]", book.format.to_uppercase()),
            Style::default().fg(Color::Cyan),
        ),
    ];
    if let Some(pages) = book.page_count {
        spans.push(Span::styled(
            format!("  {pages}p"),
            Style::default().fg(Color::DarkGray),
        ));
    }
    if let Some(author) = &book.author {
        spans.push(Span::styled(
            format!("  {author}"),
            Style::default().fg(Color::DarkGray),
        ));
    }
    Line::from(spans)
}

fn draw_reader(f: &mut Frame, app: &mut App) {
    let Some(reader) = app.reader.as_mut() else {
        return;
    };

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // title + mode
            Constraint::Min(5),    // pages
            Constraint::Length(1), // progress
            Constraint::Length(3), // footer
        ])
        .split(f.area());

    draw_reader_header(f, root[0], reader);

    let content_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let content = content_block.inner(root[1]);
    f.render_widget(content_block, root[1]);
    reader.viewport = content;

    match reader.session.load_state().clone() {
        LoadState::Loading => draw_message(f, content, "Loading...", Color::DarkGray),
        LoadState::Failed(message) => {
            draw_message(f, content, &format!("Error: {message}"), Color::Red)
        }
        LoadState::Loaded if reader.session.mode().is_scrolling() => {
            draw_scrolling_pages(f, content, reader)
        }
        LoadState::Loaded => draw_paged(f, content, reader),
    }

    draw_progress(f, root[2], reader, app.status.as_deref());

    let footer: Vec<(&str, &str)> = if let Some(input) = &reader.jump_input {
        vec![("Jump to %", input.as_str()), ("Enter", "go"), ("Esc", "cancel")]
    } else if reader.session.mode().is_scrolling() {
        vec![
            ("↑/↓", "scroll"),
            ("←/→", "page"),
            ("g", "jump"),
            ("m", "mode"),
            ("Esc", "back"),
        ]
    } else {
        vec![
            ("←/→", "page"),
            ("Home/End", "first/last"),
            ("g", "jump"),
            ("s", "spread"),
            ("m", "mode"),
            ("Esc", "back"),
        ]
    };
    draw_footer(f, root[3], &footer);
}

fn draw_reader_header(f: &mut Frame, area: Rect, reader: &ReaderView) {
    let session = &reader.session;
    let pages = session.displayed_pages();
    let position = match pages.as_slice() {
        [] => "-".to_string(),
        [page] => format!("{page}/{}", session.total_pages()),
        [first, .., last] => format!("{first}-{last}/{}", session.total_pages()),
    };

    let mut spans = vec![
        Span::styled(
            truncate_text(&reader.title, area.width.saturating_sub(40) as usize),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(position, Style::default().fg(Color::Yellow)),
        Span::raw("  "),
        Span::styled(session.mode().label(), Style::default().fg(Color::Cyan)),
    ];
    if session.mode() == ReadingMode::Paged && session.spread_enabled() {
        spans.push(Span::styled(" · spreads", Style::default().fg(Color::Magenta)));
    }

    let p = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Comic Shelf")
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(p, area);
}

fn draw_paged(f: &mut Frame, area: Rect, reader: &mut ReaderView) {
    let pages = reader.session.displayed_pages();
    if pages.is_empty() {
        draw_message(f, area, "This book has no pages", Color::DarkGray);
        return;
    }

    let constraints: Vec<Constraint> = pages
        .iter()
        .map(|_| Constraint::Ratio(1, pages.len() as u32))
        .collect();
    let areas = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(constraints)
        .split(area);

    for (page, page_area) in pages.iter().zip(areas.iter()) {
        draw_page(f, *page_area, reader, *page);
    }
}

fn draw_scrolling_pages(f: &mut Frame, area: Rect, reader: &mut ReaderView) {
    let top = reader.scroll_top;
    let bottom = top + area.height as f64;

    for item in reader.visible_items() {
        let start = item.start.max(top);
        let end = item.end.min(bottom);
        if end <= start {
            continue;
        }
        let y = area.y + (start - top) as u16;
        let height = ((end - start) as u16).min(area.y + area.height - y);
        let page_area = Rect::new(area.x, y, area.width, height);
        draw_page(f, page_area, reader, item.index as u32 + 1);
    }
}

fn draw_page(f: &mut Frame, area: Rect, reader: &mut ReaderView, page: u32) {
    if let Some(state) = reader.image_states.get_mut(&page) {
        let image_widget = StatefulImage::new().resize(Resize::Fit(None));
        f.render_stateful_widget(image_widget, area, state);
    } else if let Some(error) = reader.page_errors.get(&page) {
        draw_message(f, area, &format!("Page {page} - Error: {error}"), Color::Red);
    } else {
        draw_message(f, area, &format!("Page {page} - Loading..."), Color::DarkGray);
    }
}

fn draw_progress(f: &mut Frame, area: Rect, reader: &ReaderView, status: Option<&str>) {
    let warning = reader
        .session
        .last_error()
        .map(|error| format!("Progress not saved: {error}"))
        .or_else(|| status.map(str::to_string));
    if let Some(warning) = warning {
        let p = Paragraph::new(warning).style(Style::default().fg(Color::Red));
        f.render_widget(p, area);
        return;
    }
    let progress = reader.session.display_progress();
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(Color::Cyan).bg(Color::Black))
        .ratio(progress.clamp(0.0, 1.0))
        .label(format!("{:.0}%", progress * 100.0));
    f.render_widget(gauge, area);
}

fn draw_message(f: &mut Frame, area: Rect, text: &str, color: Color) {
    if area.height == 0 {
        return;
    }
    let y = area.y + area.height / 2;
    let p = Paragraph::new(text.to_string())
        .style(Style::default().fg(color))
        .alignment(Alignment::Center);
    f.render_widget(p, Rect::new(area.x, y, area.width, 1));
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        format!(
            "{}...",
            text.chars()
                .take(max_len.saturating_sub(3))
                .collect::<String>()
        )
    }
}

fn draw_footer(f: &mut Frame, area: Rect, keys: &[(&str, &str)]) {
    let mut spans = Vec::new();
    for (key, action) in keys {
        spans.push(Span::styled(*key, Style::default().fg(Color::Yellow)));
        spans.push(Span::raw(format!(": {action}  ")));
    }

    let p = Paragraph::new(Line::from(spans))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .alignment(Alignment::Center);
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_line_shows_page_count() {
        let book = Book {
            id: 1,
            title: "Akira".into(),
            author: None,
            format: "cbz".into(),
            page_count: Some(120),
        };
        let text: String = book_line(&book)
            .spans
            .iter()
            .map(|span| span.content.as_ref())
            .collect();
        assert_eq!(text, "Akira  [CBZ]  120p");
    }

    #[test]
    fn truncate_text_adds_ellipsis() {
        assert_eq!(truncate_text("Akira", 10), "Akira");
        assert_eq!(truncate_text("Ghost in the Shell", 8), "Ghost...");
    }
}
