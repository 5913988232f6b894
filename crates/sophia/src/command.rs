use std::path::PathBuf;

use sophia_core::ConversationId;
use sophia_core::conversation::ConversationKind;

pub const HELP: &str = "\
/login <email> <password>   sign in
/otp <code>                 complete a sign-in that asked for a code
/logout                     sign out
/list                       reload the conversation list
/new [chat|summarize|creative]
                            start a draft conversation
/open <id>                  open a conversation
/draft                      switch to the draft
/delete [id]                delete a conversation, the active one by default
/attach <path>              attach a file to the next message
/guest                      chat without signing in
/help                       show this help
/quit                       exit";

/// A line of input from the REPL.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Login { email: String, password: String },
    Otp(String),
    Logout,
    List,
    New(ConversationKind),
    Open(ConversationId),
    Draft,
    Delete(Option<ConversationId>),
    Attach(PathBuf),
    Guest,
    Help,
    Quit,
    Message(String),
}

impl Command {
    /// Parses a line. Errors are usage messages.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Command::Message(line.to_owned()));
        };
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        let mut words = args.split_whitespace();

        let cmd = match name {
            "login" => match (words.next(), words.next()) {
                (Some(email), Some(password)) => Command::Login {
                    email: email.to_owned(),
                    password: password.to_owned(),
                },
                _ => return Err("usage: /login <email> <password>".to_owned()),
            },
            "otp" => match words.next() {
                Some(code) => Command::Otp(code.to_owned()),
                None => return Err("usage: /otp <code>".to_owned()),
            },
            "logout" => Command::Logout,
            "list" => Command::List,
            "new" => Command::New(
                words
                    .next()
                    .map(ConversationKind::from_tag)
                    .unwrap_or_default(),
            ),
            "open" => match words.next() {
                Some(id) => Command::Open(id.into()),
                None => return Err("usage: /open <id>".to_owned()),
            },
            "draft" => Command::Draft,
            "delete" => Command::Delete(words.next().map(Into::into)),
            "attach" if !args.is_empty() => Command::Attach(args.into()),
            "attach" => return Err("usage: /attach <path>".to_owned()),
            "guest" => Command::Guest,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => {
                return Err(format!("unknown command `/{other}`, try /help"));
            }
        };
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("/login a@example.com secret").unwrap(),
            Command::Login {
                email: "a@example.com".to_owned(),
                password: "secret".to_owned(),
            }
        );
        assert_eq!(
            Command::parse("/new summarize").unwrap(),
            Command::New(ConversationKind::Summarize)
        );
        assert_eq!(
            Command::parse("/new").unwrap(),
            Command::New(ConversationKind::Chat)
        );
        assert_eq!(Command::parse("/delete").unwrap(), Command::Delete(None));
        assert_eq!(
            Command::parse("/delete 42").unwrap(),
            Command::Delete(Some("42".into()))
        );
        assert_eq!(
            Command::parse("/attach ~/My Files/a.pdf").unwrap(),
            Command::Attach("~/My Files/a.pdf".into())
        );
    }

    #[test]
    fn test_plain_lines_are_messages() {
        assert_eq!(
            Command::parse("  hello there \n").unwrap(),
            Command::Message("hello there".to_owned())
        );
        assert_eq!(
            Command::parse("").unwrap(),
            Command::Message(String::new())
        );
    }

    #[test]
    fn test_usage_errors() {
        assert!(Command::parse("/login only-email").is_err());
        assert!(Command::parse("/open").is_err());
        assert!(Command::parse("/attach").is_err());
        assert!(Command::parse("/frobnicate").unwrap_err().contains("/help"));
    }
}
