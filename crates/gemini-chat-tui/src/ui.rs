use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use gemini_chat_core::Role;
use crate::app::App;

/// Style `**bold**` runs. An unmatched trailing `**` is kept literally.
fn styled_line(text: &str) -> Line<'static> {
    let segments: Vec<&str> = text.split("**").collect();
    let closed = segments.len() % 2 == 1;
    let mut spans: Vec<Span<'static>> = Vec::new();

    for (i, segment) in segments.iter().enumerate() {
        let is_last = i == segments.len() - 1;
        if i % 2 == 1 && (closed || !is_last) {
            if !segment.is_empty() {
                spans.push(Span::styled(
                    segment.to_string(),
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            }
        } else if i % 2 == 1 {
            spans.push(Span::raw(format!("**{}", segment)));
        } else if !segment.is_empty() {
            spans.push(Span::raw(segment.to_string()));
        }
    }

    Line::from(spans)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();
    let error_height = if app.conversation.error().is_some() { 4 } else { 0 };

    let [header_area, chat_area, error_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(error_height),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    if error_height > 0 {
        render_error(app, frame, error_area);
    }
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" Gemini Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!("[{}]", app.model), Style::default().fg(Color::White)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store area for mouse hit-testing and inner size for scroll calculations
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);
    if app.follow_tail {
        app.scroll_chat_to_bottom();
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Conversation ");

    let messages = app.conversation.messages();
    let text = if messages.is_empty() {
        Text::from(Span::styled(
            "Ask anything. Ctrl-W turns your last prompt into a step-by-step workflow.",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();
        let last = messages.len() - 1;

        for (i, msg) in messages.iter().enumerate() {
            match msg.role {
                Role::User => {
                    lines.push(Line::from(Span::styled(
                        "You:",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    )));
                    lines.extend(msg.text.lines().map(|l| Line::from(l.to_string())));
                }
                Role::Model => {
                    let mut label = vec![Span::styled(
                        "Gemini:",
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    )];
                    if msg.is_workflow {
                        label.push(Span::styled(" [workflow]", Style::default().fg(Color::Magenta)));
                    }
                    lines.push(Line::from(label));

                    if msg.text.is_empty() && i == last && app.conversation.is_loading() {
                        // Animated ellipsis: cycles through ".", "..", "..."
                        let dots = ".".repeat((app.animation_frame as usize) + 1);
                        let verb = if msg.is_workflow { "Building workflow" } else { "Thinking" };
                        lines.push(Line::from(Span::styled(
                            format!("{}{}", verb, dots),
                            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                        )));
                    } else {
                        lines.extend(msg.text.lines().map(styled_line));
                    }
                }
            }
            lines.push(Line::default());
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_error(app: &App, frame: &mut Frame, area: Rect) {
    let message = app.conversation.error().unwrap_or_default();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" An Error Occurred ");

    let error = Paragraph::new(message.to_string())
        .style(Style::default().fg(Color::LightRed))
        .block(block)
        .wrap(Wrap { trim: true });
    frame.render_widget(error, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let loading = app.conversation.is_loading();
    let border_color = if loading { Color::DarkGray } else { Color::Yellow };
    let title = if loading { " Waiting for reply... " } else { " Prompt " };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Keep the cursor visible on long input by scrolling horizontally
    let inner_width = area.width.saturating_sub(2) as usize;
    let offset = app.input_cursor.saturating_sub(inner_width.saturating_sub(1));
    let visible: String = app.input.chars().skip(offset).collect();

    let input = Paragraph::new(visible).block(block);
    frame.render_widget(input, area);

    let cursor_x = (app.input_cursor - offset) as u16;
    frame.set_cursor_position((area.x + 1 + cursor_x, area.y + 1));
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mut spans = vec![
        Span::styled(" CHAT ", Style::default().bg(Color::Blue).fg(Color::White)),
        Span::raw(" "),
    ];

    if let Some(status) = &app.status {
        spans.push(Span::styled(status.clone(), Style::default().fg(Color::Green)));
    } else {
        let workflow_style = if app.conversation.can_create_workflow() {
            Style::default().fg(Color::Gray)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled("Enter", Style::default().fg(Color::Yellow)));
        spans.push(Span::styled(" send  ", Style::default().fg(Color::Gray)));
        spans.push(Span::styled("^W", Style::default().fg(Color::Yellow)));
        spans.push(Span::styled(" workflow  ", workflow_style));
        spans.push(Span::styled("^S", Style::default().fg(Color::Yellow)));
        spans.push(Span::styled(" save  ", Style::default().fg(Color::Gray)));
        spans.push(Span::styled("PgUp/PgDn", Style::default().fg(Color::Yellow)));
        spans.push(Span::styled(" scroll  ", Style::default().fg(Color::Gray)));
        spans.push(Span::styled("Esc", Style::default().fg(Color::Yellow)));
        spans.push(Span::styled(" quit", Style::default().fg(Color::Gray)));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_bold_runs_are_styled() {
        let line = styled_line("**1. Mix** the dough");
        assert_eq!(line.spans.len(), 2);
        assert_eq!(line.spans[0].content, "1. Mix");
        assert!(line.spans[0].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(line.spans[1].content, " the dough");
    }

    #[test]
    fn test_unclosed_bold_is_literal() {
        let line = styled_line("a **b");
        assert_eq!(plain(&line), "a **b");
        assert!(line.spans.iter().all(|s| !s.style.add_modifier.contains(Modifier::BOLD)));
    }

    #[test]
    fn test_plain_line_untouched() {
        assert_eq!(plain(&styled_line("no markup here")), "no markup here");
        assert!(styled_line("").spans.is_empty());
    }
}
