// src/system/prompt.rs

//! Yes/no confirmations.

use dialoguer::{Confirm, theme::ColorfulTheme};

/// How a yes/no question gets answered. Asking never blocks the async runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Ask on the terminal, defaulting to "no".
    Ask,
    /// Answer "yes" without touching the terminal (`--yes`, unattended runs).
    AssumeYes,
    /// Answer "no" without touching the terminal.
    AssumeNo,
}

impl Confirmation {
    /// [`Confirmation::AssumeYes`] when `auto`, otherwise ask.
    pub fn auto_if(auto: bool) -> Self {
        if auto { Self::AssumeYes } else { Self::Ask }
    }

    /// Answers `prompt`, asking on a blocking thread when needed.
    pub async fn ask(&self, prompt: String) -> Result<bool, dialoguer::Error> {
        match self {
            Self::AssumeYes => {
                log::debug!("Auto-confirmed: {}", prompt);
                Ok(true)
            }
            Self::AssumeNo => {
                log::debug!("Auto-declined: {}", prompt);
                Ok(false)
            }
            Self::Ask => tokio::task::spawn_blocking(move || {
                Confirm::with_theme(&ColorfulTheme::default())
                    .with_prompt(prompt)
                    .default(false)
                    .interact()
            })
            .await
            .map_err(|e| dialoguer::Error::IO(std::io::Error::other(e)))?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_assumed_answers_never_prompt() {
        let question = || "Kill the process on port 3000?".to_string();
        assert!(Confirmation::AssumeYes.ask(question()).await.unwrap());
        assert!(!Confirmation::AssumeNo.ask(question()).await.unwrap());
    }

    #[test]
    fn test_auto_if() {
        assert_eq!(Confirmation::auto_if(true), Confirmation::AssumeYes);
        assert_eq!(Confirmation::auto_if(false), Confirmation::Ask);
    }
}
