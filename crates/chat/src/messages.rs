use serde::Serialize;
use tutorbot_core::{CallerStatus, SolveError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    #[default]
    Plain,
    Markdown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self { label: label.into(), callback_data: callback_data.into() }
    }
}

/// One outbound chat message. Buttons are laid out row by row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplyMessage {
    pub text: String,
    pub parse_mode: ParseMode,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Vec<InlineButton>>,
}

impl ReplyMessage {
    pub fn plain(text: impl Into<String>) -> Self {
        MessageBuilder::new(text).build()
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        MessageBuilder::new(text).markdown().build()
    }

    pub fn button_count(&self) -> usize {
        self.buttons.iter().map(Vec::len).sum()
    }
}

pub struct MessageBuilder {
    text: String,
    parse_mode: ParseMode,
    buttons: Vec<Vec<InlineButton>>,
}

impl MessageBuilder {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), parse_mode: ParseMode::Plain, buttons: Vec::new() }
    }

    pub fn markdown(mut self) -> Self {
        self.parse_mode = ParseMode::Markdown;
        self
    }

    pub fn row<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut RowBuilder),
    {
        let mut builder = RowBuilder::default();
        build(&mut builder);
        if !builder.buttons.is_empty() {
            self.buttons.push(builder.buttons);
        }
        self
    }

    pub fn build(self) -> ReplyMessage {
        ReplyMessage { text: self.text, parse_mode: self.parse_mode, buttons: self.buttons }
    }
}

#[derive(Default)]
pub struct RowBuilder {
    buttons: Vec<InlineButton>,
}

impl RowBuilder {
    pub fn button(&mut self, label: impl Into<String>, callback_data: impl Into<String>) -> &mut Self {
        self.buttons.push(InlineButton::new(label, callback_data));
        self
    }
}

pub struct DemoQuestion {
    pub callback_data: &'static str,
    pub label: &'static str,
    pub question: &'static str,
}

pub const ASK_OWN_CALLBACK: &str = "ask_own";

pub const DEMO_QUESTIONS: &[DemoQuestion] = &[
    DemoQuestion {
        callback_data: "demo_basic_addition",
        label: "🔢 What is 2 + 2?",
        question: "What is 2 + 2?",
    },
    DemoQuestion {
        callback_data: "demo_quadratic",
        label: "📐 Solve: x² - 5x + 6 = 0",
        question: "Solve: x² - 5x + 6 = 0",
    },
    DemoQuestion {
        callback_data: "demo_derivative",
        label: "📊 Find derivative of x³ + 2x",
        question: "Find the derivative of x³ + 2x",
    },
    DemoQuestion {
        callback_data: "demo_pythagoras",
        label: "🔺 Pythagorean theorem example",
        question: "In a right triangle, if one leg is 3 and the other is 4, what is the hypotenuse?",
    },
    DemoQuestion {
        callback_data: "demo_fact",
        label: "💡 Random math fact",
        question: "What is the mathematical constant π (pi)?",
    },
];

pub fn demo_question(callback_data: &str) -> Option<&'static DemoQuestion> {
    DEMO_QUESTIONS.iter().find(|demo| demo.callback_data == callback_data)
}

pub fn welcome_message(display_name: Option<&str>) -> ReplyMessage {
    let name = display_name.map(str::trim).filter(|name| !name.is_empty()).unwrap_or("there");
    let text = format!(
        "👋 **Welcome to Math Tutor Bot, {name}!**\n\n\
         I'm your AI-powered math tutor ready to help you solve problems step-by-step.\n\n\
         **How to use:**\n\
         • Send me any math problem as text\n\
         • Upload a photo of handwritten math problems\n\
         • Get detailed explanations and solutions\n\n\
         **Try these demo questions to get started:**\n\
         👇 Click any button below to see a sample solution!"
    );

    DEMO_QUESTIONS
        .iter()
        .fold(MessageBuilder::new(text).markdown(), |builder, demo| {
            builder.row(|row| {
                row.button(demo.label, demo.callback_data);
            })
        })
        .build()
}

pub fn help_message() -> ReplyMessage {
    ReplyMessage::plain(
        "🆘 Math Tutor Bot Help\n\n\
         Commands:\n\
         • /start - Welcome message with demo questions\n\
         • /help - Show this help message\n\
         • /about - Information about the bot\n\
         • /status - Your current usage allowance\n\n\
         How to use:\n\
         1. Text Problems: Simply type your math problem\n\
         2. Photo Problems: Send a clear photo of the math problem\n\
         3. Demo Questions: Use /start to try sample problems\n\
         4. Supported Math Types: Algebra, Calculus, Geometry, Statistics, and more\n\n\
         Tips for better results:\n\
         • Be specific with your questions\n\
         • Use proper mathematical notation when possible\n\
         • For photos, ensure good lighting and clear text\n\
         • One problem per message works best\n\n\
         Example Questions:\n\
         • \"Solve: x² - 5x + 6 = 0\"\n\
         • \"Integrate: ∫(2x + 3)dx\"\n\
         • \"Find the slope of the line passing through (1,2) and (3,8)\"",
    )
}

pub fn about_message(provider: &str) -> ReplyMessage {
    ReplyMessage::plain(format!(
        "🤖 About Math Tutor Bot\n\n\
         Version: {version}\n\
         Powered by: {provider}\n\
         Features: AI-powered math solving with step-by-step explanations\n\n\
         Current Capabilities:\n\
         • Step-by-step problem solving\n\
         • OCR for handwritten problems\n\
         • Multiple math subjects support\n\
         • Interactive demo questions\n\n\
         Privacy & Safety:\n\
         • Conversations may be logged for improvement\n\
         • Content filtering for appropriate use\n\
         • Rate limiting to ensure fair usage",
        version = env!("CARGO_PKG_VERSION"),
    ))
}

pub fn status_message(status: &CallerStatus) -> ReplyMessage {
    let mut text = format!(
        "📊 Usage status\n\n\
         Requests in the last {window}s: {recent}/{max}\n\
         Remaining: {remaining}",
        window = status.window_seconds,
        recent = status.recent_requests,
        max = status.max_requests,
        remaining = status.remaining_requests,
    );
    if status.is_banned {
        text.push_str(&format!(
            "\n\n⏱️ You are paused for another {}s.",
            status.ban_time_remaining_secs
        ));
    }
    ReplyMessage::plain(text)
}

pub fn status_unavailable_message() -> ReplyMessage {
    ReplyMessage::plain("📊 Usage status is not available right now.")
}

pub fn error_message(error: &SolveError) -> ReplyMessage {
    ReplyMessage::plain(error.user_message())
}

pub fn ask_own_prompt() -> ReplyMessage {
    MessageBuilder::new("✨ **Want to try your own question?** Just type any math problem!")
        .markdown()
        .row(|row| {
            row.button("❓ Ask your own question", ASK_OWN_CALLBACK);
        })
        .build()
}

pub fn ask_own_hint() -> ReplyMessage {
    ReplyMessage::plain("✍️ Just type any math problem and I'll solve it step by step!")
}
