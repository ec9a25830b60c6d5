//! Interactive quiz loop on stdin/stdout.

use std::error::Error;
use std::io::Write;

use learn_core::model::{FailureReason, QuestionSet, SessionState};
use services::{QuizController, QuizError};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

type Input = Lines<BufReader<Stdin>>;

pub async fn run(controller: &QuizController) -> Result<(), Box<dyn Error>> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match controller.start_session() {
            Ok(_) => {}
            Err(QuizError::Unauthenticated) => {
                println!("Not signed in: save a token with `save-token` first.");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        println!("Loading quiz...");
        let snapshot = controller.settled().await;
        let questions = match &snapshot.state {
            SessionState::Active { questions, .. } => questions.clone(),
            SessionState::Failed { reason, attempts } => {
                println!("Quiz unavailable: {reason} ({attempts} failed attempts).");
                if let Some(err) = &snapshot.last_error {
                    println!("  {err}");
                }
                if *reason == FailureReason::Unauthenticated {
                    println!("Save a fresh token with `save-token` and try again.");
                    return Ok(());
                }
                if confirm(&mut input, "Try again? [y/N] ").await? {
                    continue;
                }
                return Ok(());
            }
            other => return Err(format!("quiz stopped while {}", other.kind()).into()),
        };

        ask_all(controller, &questions, &mut input).await?;

        loop {
            match controller.submit().await {
                Ok(score) => {
                    println!("Your score: {score}");
                    break;
                }
                Err(QuizError::SubmissionFailed(err)) => {
                    println!("Submitting failed: {err}");
                    if !confirm(&mut input, "Submit again? [y/N] ").await? {
                        return Ok(());
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        if !confirm(&mut input, "Take another quiz? [y/N] ").await? {
            return Ok(());
        }
    }
}

async fn ask_all(
    controller: &QuizController,
    questions: &QuestionSet,
    input: &mut Input,
) -> Result<(), Box<dyn Error>> {
    if let Some(topic) = questions.topic() {
        println!("\nTopic: {topic}");
    }

    for (index, question) in questions.questions().iter().enumerate() {
        println!("\n{}. {}", index + 1, question.prompt());
        for (n, option) in question.options().iter().enumerate() {
            println!("   {}) {option}", n + 1);
        }

        loop {
            let line = prompt(input, "> ").await?;
            let Some(option) = pick_option(question.options(), &line) else {
                println!("Pick a number between 1 and {}.", question.options().len());
                continue;
            };
            match controller.record_answer(question.prompt(), option) {
                Ok(progress) => {
                    println!("({}/{} answered)", progress.answered, progress.total);
                    break;
                }
                Err(err @ (QuizError::UnknownQuestion { .. } | QuizError::UnknownOption { .. })) => {
                    println!("{err}");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}

/// Accepts either the option's number or its exact text.
fn pick_option<'a>(options: &'a [String], line: &str) -> Option<&'a str> {
    let line = line.trim();
    if let Ok(n) = line.parse::<usize>() {
        return n
            .checked_sub(1)
            .and_then(|i| options.get(i))
            .map(String::as_str);
    }
    options.iter().find(|o| o.as_str() == line).map(String::as_str)
}

async fn prompt(input: &mut Input, text: &str) -> Result<String, Box<dyn Error>> {
    print!("{text}");
    std::io::stdout().flush()?;
    match input.next_line().await? {
        Some(line) => Ok(line),
        None => Err("input closed".into()),
    }
}

async fn confirm(input: &mut Input, text: &str) -> Result<bool, Box<dyn Error>> {
    let answer = prompt(input, text).await?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
