//! Input collection, interactive or from resolved answers.

use dialoguer::{Confirm, Input, Password, console::Term};
use tracing::{info, warn};

use crate::{
    authelia::AdminProfile,
    cli::{
        answers::InitAnswers,
        validation::{
            validate_display_name, validate_email, validate_password,
            validate_username,
        },
    },
    credentials::PlaintextPassword,
    domain::DomainSpec,
    error::InitError,
};

/// Validated answers. The password is still plaintext and is consumed by the
/// hasher.
#[derive(Debug)]
pub struct CollectedInput {
    /// Parsed base URL.
    pub domain: DomainSpec,
    /// Admin username.
    pub username: String,
    /// Admin password.
    pub password: PlaintextPassword,
    /// New accounts skip email confirmation.
    pub email_autoconfirm: bool,
    /// Present only with second-factor auth.
    pub profile: Option<AdminProfile>,
    /// Keep daemon sessions in Redis.
    pub session_store: bool,
    /// The password is the built-in [`DEFAULT_PASSWORD`](crate::cli::answers::DEFAULT_PASSWORD).
    /// Never set by interactive runs, where the password is always typed.
    pub default_password: bool,
}

/// Validate resolved answers without prompting. Any invalid value is fatal.
pub fn collect_non_interactive(
    answers: InitAnswers,
    second_factor: bool,
) -> Result<CollectedInput, InitError> {
    let domain = DomainSpec::parse(&answers.base_url, second_factor)?;
    let username = validate_username(&answers.username)?;
    validate_password(&answers.password, &answers.password)?;
    let profile = if second_factor {
        Some(AdminProfile {
            email: validate_email(&answers.email)?,
            display_name: validate_display_name(&answers.display_name)?,
        })
    } else {
        None
    };
    info!(host = %domain.host(), username = %username, "using non-interactive answers");
    Ok(CollectedInput {
        domain,
        username,
        password: answers.password,
        email_autoconfirm: answers.email_autoconfirm,
        profile,
        session_store: second_factor && answers.session_store,
        default_password: answers.default_password,
    })
}

/// Feed answers to `parse` until one is accepted.
///
/// Recoverable errors go to `report` and the next answer is tried; any other
/// error, including one from the answer source, is returned as is. Running
/// out of answers is a [`InitError::Prompt`] error.
pub fn retry_until_valid<A, T, I, P, R>(
    answers: I,
    mut parse: P,
    mut report: R,
) -> Result<T, InitError>
where
    I: IntoIterator<Item = Result<A, InitError>>,
    P: FnMut(A) -> Result<T, InitError>,
    R: FnMut(&InitError) -> Result<(), InitError>,
{
    for answer in answers {
        match parse(answer?) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_recoverable() => {
                warn!(error = %err, "invalid answer");
                report(&err)?;
            }
            Err(err) => return Err(err),
        }
    }
    Err(InitError::Prompt(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "no more answers",
    )))
}

fn report_on(term: &Term) -> impl FnMut(&InitError) -> Result<(), InitError> + '_ {
    move |err| {
        term.write_line(&format!("  {err}"))
            .map_err(InitError::Prompt)
    }
}

fn prompt_until_valid<T, F>(
    term: &Term,
    prompt: &str,
    default: &str,
    parse: F,
) -> Result<T, InitError>
where
    F: FnMut(String) -> Result<T, InitError>,
{
    let answers = std::iter::from_fn(|| {
        Some(
            Input::<String>::new()
                .with_prompt(prompt)
                .default(default.to_string())
                .interact_text_on(term)
                .map_err(InitError::from),
        )
    });
    retry_until_valid(answers, parse, report_on(term))
}

fn prompt_password(term: &Term) -> Result<PlaintextPassword, InitError> {
    let read = |prompt: &str| -> Result<PlaintextPassword, InitError> {
        Ok(PlaintextPassword::new(
            Password::new().with_prompt(prompt).interact_on(term)?,
        ))
    };
    let answers = std::iter::from_fn(|| {
        Some(read("Admin password").and_then(|first| {
            read("Repeat admin password").map(|second| (first, second))
        }))
    });
    retry_until_valid(answers, accept_password, report_on(term))
}

/// Accept a password and its confirmation.
fn accept_password(
    (password, confirmation): (PlaintextPassword, PlaintextPassword),
) -> Result<PlaintextPassword, InitError> {
    validate_password(&password, &confirmation)?;
    Ok(password)
}

/// Prompt on `term` for every answer, using `answers` as defaults.
///
/// Invalid answers are reported and asked again; the password has no default.
pub fn collect_interactive(
    answers: InitAnswers,
    second_factor: bool,
    term: &Term,
) -> Result<CollectedInput, InitError> {
    let domain = prompt_until_valid(
        term,
        "Public base URL (scheme://host)",
        &answers.base_url,
        |raw| DomainSpec::parse(&raw, second_factor),
    )?;
    let username = prompt_until_valid(
        term,
        "Admin username",
        &answers.username,
        |raw| Ok(validate_username(&raw)?),
    )?;
    let password = prompt_password(term)?;
    let email_autoconfirm = Confirm::new()
        .with_prompt("Confirm new accounts automatically (skip email verification)?")
        .default(answers.email_autoconfirm)
        .interact_on(term)?;

    let (profile, session_store) = if second_factor {
        let email = prompt_until_valid(
            term,
            "Admin email",
            &answers.email,
            |raw| Ok(validate_email(&raw)?),
        )?;
        let display_name = prompt_until_valid(
            term,
            "Admin display name",
            &answers.display_name,
            |raw| Ok(validate_display_name(&raw)?),
        )?;
        let session_store = Confirm::new()
            .with_prompt("Keep second-factor sessions in a Redis session store?")
            .default(answers.session_store)
            .interact_on(term)?;
        (
            Some(AdminProfile {
                email,
                display_name,
            }),
            session_store,
        )
    } else {
        (None, false)
    };

    Ok(CollectedInput {
        domain,
        username,
        password,
        email_autoconfirm,
        profile,
        session_store,
        default_password: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PolicyError, ValidationError};

    fn typed(answers: &[&str]) -> Vec<Result<String, InitError>> {
        answers.iter().map(|a| Ok(a.to_string())).collect()
    }

    #[test]
    fn defaults_validate_for_both_modes() {
        let basic = collect_non_interactive(InitAnswers::default(), false)
            .unwrap();
        assert!(basic.profile.is_none());
        assert!(!basic.session_store);

        let tfa =
            collect_non_interactive(InitAnswers::default(), true).unwrap();
        let profile = tfa.profile.unwrap();
        assert_eq!(profile.email, "admin@example.com");
        assert_eq!(profile.display_name, "Administrator");
    }

    #[test]
    fn invalid_answers_are_fatal_without_prompts() {
        let answers = InitAnswers {
            base_url: "http://apps.example.com".into(),
            ..InitAnswers::default()
        };
        assert!(matches!(
            collect_non_interactive(answers, true),
            Err(InitError::Policy(PolicyError::SecondFactorNeedsHttps { .. }))
        ));

        let answers = InitAnswers {
            username: "not valid".into(),
            ..InitAnswers::default()
        };
        assert!(matches!(
            collect_non_interactive(answers, false),
            Err(InitError::Validation(ValidationError::Username))
        ));
    }

    #[test]
    fn session_store_ignored_without_second_factor() {
        let answers = InitAnswers {
            session_store: true,
            ..InitAnswers::default()
        };
        assert!(!collect_non_interactive(answers, false).unwrap().session_store);
    }

    #[test]
    fn default_password_is_flagged_until_replaced() {
        assert!(
            collect_non_interactive(InitAnswers::default(), false)
                .unwrap()
                .default_password
        );

        let mut answers = InitAnswers::default();
        answers.apply_file(crate::cli::answers::AnswersFile {
            password: Some("a chosen password".into()),
            ..Default::default()
        });
        assert!(!collect_non_interactive(answers, false).unwrap().default_password);
    }

    #[test]
    fn rejected_url_is_reported_then_asked_again() {
        let mut reported = Vec::new();
        let domain = retry_until_valid(
            typed(&["http://apps.example.com", "https://db.acme.io"]),
            |raw: String| DomainSpec::parse(&raw, true),
            |err| {
                reported.push(err.to_string());
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(domain.host(), "db.acme.io");
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("https"));
    }

    #[test]
    fn fatal_errors_stop_asking() {
        let mut answers = typed(&["first", "second"]).into_iter();
        let mut parsed = 0;
        let err = retry_until_valid(
            answers.by_ref(),
            |_: String| -> Result<(), InitError> {
                parsed += 1;
                Err(InitError::Dependency {
                    tool: "docker".into(),
                })
            },
            |_| Ok(()),
        )
        .unwrap_err();

        assert!(matches!(err, InitError::Dependency { .. }));
        assert_eq!(parsed, 1);
        assert_eq!(answers.len(), 1);
    }

    #[test]
    fn answer_source_errors_are_returned() {
        let answers = vec![Err(InitError::Prompt(std::io::Error::other("closed")))];
        let err = retry_until_valid(
            answers,
            |raw: String| Ok(validate_username(&raw)?),
            |_| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, InitError::Prompt(_)));
    }

    #[test]
    fn running_out_of_answers_is_a_prompt_error() {
        let err = retry_until_valid(
            typed(&["not valid", "also not valid"]),
            |raw: String| Ok(validate_username(&raw)?),
            |_| Ok(()),
        )
        .unwrap_err();
        match err {
            InitError::Prompt(io) => {
                assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn mismatched_password_pair_is_asked_again() {
        let pairs = [
            ("correct horse", "correct h0rse"),
            ("short", "short"),
            ("correct horse", "correct horse"),
        ]
        .map(|(first, second)| {
            Ok((PlaintextPassword::new(first), PlaintextPassword::new(second)))
        });
        let mut reported = Vec::new();
        let password = retry_until_valid(pairs, accept_password, |err| {
            reported.push(err.to_string());
            Ok(())
        })
        .unwrap();

        assert_eq!(password.as_str(), "correct horse");
        assert_eq!(reported.len(), 2);
    }

    #[test]
    fn report_failure_aborts_the_retry() {
        let err = retry_until_valid(
            typed(&["not valid", "admin"]),
            |raw: String| Ok(validate_username(&raw)?),
            |_| Err(InitError::Prompt(std::io::Error::other("terminal gone"))),
        )
        .unwrap_err();
        assert!(matches!(err, InitError::Prompt(_)));
    }
}
