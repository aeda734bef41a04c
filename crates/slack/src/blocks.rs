use serde::Serialize;

use knowbot_core::domain::answer::{CallbackToken, Decision};

/// Slack refuses section blocks whose text is longer than this.
pub const MAX_SECTION_TEXT_CHARS: usize = 3000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Plain { text } | Self::Mrkdwn { text } => text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ButtonElement {
    #[serde(rename = "type")]
    element_type: &'static str,
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            element_type: "button",
            action_id: action_id.into(),
            text: TextObject::plain(label),
            style: None,
            value: None,
        }
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Actions { block_id: String, elements: Vec<ButtonElement> },
    Context { block_id: String, elements: Vec<TextObject> },
}

/// A chat message: the plain `text` every client can show, plus optional
/// Block Kit layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    #[serde(rename = "text")]
    pub fallback_text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Block>,
}

impl MessageTemplate {
    pub fn text(text: impl Into<String>) -> Self {
        Self { fallback_text: text.into(), blocks: Vec::new() }
    }

    /// Block id of the first actions block. Decision messages carry their
    /// callback token here.
    pub fn actions_block_id(&self) -> Option<&str> {
        self.blocks.iter().find_map(|block| match block {
            Block::Actions { block_id, .. } => Some(block_id.as_str()),
            _ => None,
        })
    }

    pub fn action_values(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                Block::Actions { elements, .. } => Some(elements),
                _ => None,
            })
            .flatten()
            .filter_map(|element| element.value.as_deref())
            .collect()
    }
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn actions<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ActionsBuilder),
    {
        let mut builder = ActionsBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Actions { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(truncate_section_text(text.into())));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(truncate_section_text(text.into())));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

/// Cuts `text` to the section limit, marking the cut with an ellipsis. The
/// message's fallback text still carries the whole thing.
fn truncate_section_text(text: String) -> String {
    if text.chars().count() <= MAX_SECTION_TEXT_CHARS {
        return text;
    }
    let mut truncated: String = text.chars().take(MAX_SECTION_TEXT_CHARS - 1).collect();
    truncated.push('…');
    truncated
}

#[derive(Default)]
pub struct ActionsBuilder {
    elements: Vec<ButtonElement>,
}

impl ActionsBuilder {
    pub fn button(&mut self, button: ButtonElement) -> &mut Self {
        self.elements.push(button);
        self
    }

    fn build(self) -> Vec<ButtonElement> {
        self.elements
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

pub const SEARCHING_TEXT: &str =
    "Hi - thanks for your query. I will attempt to find the most appropriate people to help!";
pub const NOBODY_FOUND_TEXT: &str = "I'm sorry, I can't find anybody who might be able to help";
pub const PONG_TEXT: &str = "pong";

pub fn searching_message() -> MessageTemplate {
    MessageTemplate::text(SEARCHING_TEXT)
}

pub fn nobody_found_message() -> MessageTemplate {
    MessageTemplate::text(NOBODY_FOUND_TEXT)
}

pub fn pong_message() -> MessageTemplate {
    MessageTemplate::text(PONG_TEXT)
}

pub fn candidates_found_message(candidates: &[String]) -> MessageTemplate {
    let mentions =
        candidates.iter().map(|user_id| format!("<@{user_id}>")).collect::<Vec<_>>().join(", ");
    MessageTemplate::text(format!(
        "I have found the following users who may be able to help you: {mentions}."
    ))
}

pub fn availability_prompt(asker_id: &str) -> MessageTemplate {
    MessageTemplate::text(format!(
        "Hi! <@{asker_id}> has a question I think you may be able to help with. Are you available to answer it? (yes/no)"
    ))
}

pub fn availability_reprompt() -> MessageTemplate {
    MessageTemplate::text("Sorry, I didn't catch that. Are you available to help? Please answer yes or no.")
}

pub fn decline_acknowledgement() -> MessageTemplate {
    MessageTemplate::text("No problem, thanks for letting me know!")
}

pub fn question_message(asker_id: &str, question: &str) -> MessageTemplate {
    MessageBuilder::new(format!("<@{asker_id}> asks: {question}"))
        .section("knowbot.question.header.v1", |section| {
            section.mrkdwn(format!("*<@{asker_id}> asks:*"));
        })
        .section("knowbot.question.body.v1", |section| {
            section.plain(question);
        })
        .context("knowbot.question.hint.v1", |context| {
            context.plain("Reply with your answer and I'll pass it on.");
        })
        .build()
}

pub fn answer_reprompt() -> MessageTemplate {
    MessageTemplate::text("I didn't get an answer there. What should I tell them?")
}

pub fn answer_acknowledgement(asker_id: &str) -> MessageTemplate {
    MessageTemplate::text(format!("Thanks! I'll pass your answer on to <@{asker_id}>."))
}

pub fn giving_up_message() -> MessageTemplate {
    MessageTemplate::text("I'll take that as a no for now. Thanks anyway!")
}

pub fn superseded_message(asker_id: &str) -> MessageTemplate {
    MessageTemplate::text(format!(
        "Never mind - <@{asker_id}>'s question has already been answered. Thanks anyway!"
    ))
}

/// The relayed answer with accept/reject buttons. The actions block id is the
/// callback token, so the click can be routed back to the waiting relay.
pub fn answer_decision_message(
    token: &CallbackToken,
    answerer_id: &str,
    question: &str,
    answer: &str,
) -> MessageTemplate {
    MessageBuilder::new(format!("<@{answerer_id}> answered: {answer}"))
        .section("knowbot.answer.header.v1", |section| {
            section.mrkdwn(format!("*<@{answerer_id}> answered your question:* {question}"));
        })
        .section("knowbot.answer.body.v1", |section| {
            section.plain(answer);
        })
        .actions(token.to_string(), |actions| {
            actions
                .button(
                    ButtonElement::new("knowbot.answer.accept.v1", "Accept")
                        .style(ButtonStyle::Primary)
                        .value(Decision::Accept.action_value()),
                )
                .button(
                    ButtonElement::new("knowbot.answer.reject.v1", "Reject")
                        .style(ButtonStyle::Danger)
                        .value(Decision::Reject.action_value()),
                );
        })
        .build()
}

pub fn accepted_thanks() -> MessageTemplate {
    MessageTemplate::text("Great, glad that helped! I've saved the answer for next time.")
}

pub fn rejected_apology() -> MessageTemplate {
    MessageTemplate::text("Sorry that answer didn't help.")
}
