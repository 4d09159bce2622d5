use pulldown_cmark::{CowStr, Event, Parser, Tag};
use serde::Serialize;
use url::Url;

use crate::{chat::{Message, Sender}, store::Stamp};

/// A message as clients get it, with its Markdown body rendered.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: String,
    pub sender: Sender,
    pub body: String,
    pub body_html: String,
    pub sent_at: Stamp,
}

impl From<Message> for MessageView {
    fn from(Message { id, sender, body, sent_at, .. }: Message) -> Self {
        Self {
            body_html: render_markdown(&body),
            id,
            sender,
            body,
            sent_at,
        }
    }
}

const LINK_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Markdown to HTML. Raw HTML in the source comes out escaped, and links or
/// images pointing anywhere but the web or a mail address lose their target.
pub fn render_markdown(body: &str) -> String {
    let parser = Parser::new(body).map(|event| match event {
        Event::Html(html) | Event::InlineHtml(html) => Event::Text(html),
        Event::Start(Tag::Link { link_type, dest_url, title, id }) => Event::Start(Tag::Link {
            link_type,
            dest_url: safe_destination(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image { link_type, dest_url, title, id }) => Event::Start(Tag::Image {
            link_type,
            dest_url: safe_destination(dest_url),
            title,
            id,
        }),
        event => event,
    });

    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

/// Relative destinations stay; absolute ones keep only allowed schemes.
fn safe_destination(dest: CowStr<'_>) -> CowStr<'_> {
    match Url::parse(&dest) {
        Ok(url) if LINK_SCHEMES.contains(&url.scheme()) => dest,
        Err(url::ParseError::RelativeUrlWithoutBase) => dest,
        Ok(_) | Err(_) => CowStr::Borrowed(""),
    }
}
