use std::{io::Write as _, path::PathBuf};

use anyhow::{bail, Context, Result};
use client_core::{Direction, GalleryEvent, Workflow};
use shared::domain::AspectRatio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::commands;

const HELP: &str = "\
commands:
  list                 show the gallery
  next | prev          move the selection
  select N             select image #N
  aspect W:H           aspect ratio for new pictures (1:1, 4:3, 3:4, 16:9, 9:16)
  gen [N] [prompt]     generate N images, or submit the edit when editing
  edit                 edit the selected image with its seed
  cancel               leave edit mode
  retry                regenerate the selected image with a new seed
  delete               delete the selected image
  prompt               show the selected prompt and seed
  save [path]          write the selected picture to disk
  help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    List,
    Next,
    Previous,
    Select(usize),
    Aspect(AspectRatio),
    Generate {
        quantity: Option<u32>,
        prompt: String,
    },
    Edit,
    Cancel,
    Retry,
    Delete,
    Prompt,
    Save(Option<PathBuf>),
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ShellCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "list" | "ls" => ShellCommand::List,
        "next" | "n" => ShellCommand::Next,
        "prev" | "p" => ShellCommand::Previous,
        "select" | "s" => {
            let position = rest
                .parse()
                .with_context(|| format!("select needs an image number, got '{rest}'"))?;
            ShellCommand::Select(position)
        }
        "aspect" => ShellCommand::Aspect(rest.parse()?),
        "gen" | "generate" => parse_generate(rest)?,
        "edit" => ShellCommand::Edit,
        "cancel" => ShellCommand::Cancel,
        "retry" => ShellCommand::Retry,
        "delete" | "rm" => ShellCommand::Delete,
        "prompt" => ShellCommand::Prompt,
        "save" => ShellCommand::Save((!rest.is_empty()).then(|| PathBuf::from(rest))),
        "help" | "?" => ShellCommand::Help,
        "quit" | "exit" | "q" => ShellCommand::Quit,
        other => bail!("unknown command '{other}'; type 'help'"),
    };
    Ok(Some(command))
}

fn parse_generate(rest: &str) -> Result<ShellCommand> {
    let (first, tail) = match rest.split_once(char::is_whitespace) {
        Some((first, tail)) => (first, tail.trim()),
        None => (rest, ""),
    };
    match first.parse::<u32>() {
        Ok(0) => bail!("quantity must be at least 1"),
        Ok(quantity) => Ok(ShellCommand::Generate {
            quantity: Some(quantity),
            prompt: tail.to_string(),
        }),
        Err(_) => Ok(ShellCommand::Generate {
            quantity: None,
            prompt: rest.to_string(),
        }),
    }
}

/// Per-session choices that are not part of the gallery itself.
#[derive(Debug, Clone, Copy)]
pub struct ShellSession {
    pub aspect: AspectRatio,
}

/// Runs one command and returns the text to show.
pub async fn execute(
    workflow: &Workflow,
    session: &mut ShellSession,
    command: ShellCommand,
) -> Result<String> {
    let text = match command {
        ShellCommand::List => commands::render_list(&workflow.snapshot().await)
            .trim_end()
            .to_string(),
        ShellCommand::Next => {
            workflow.select_relative(Direction::Next).await;
            commands::describe_selected(&workflow.snapshot().await)
        }
        ShellCommand::Previous => {
            workflow.select_relative(Direction::Previous).await;
            commands::describe_selected(&workflow.snapshot().await)
        }
        ShellCommand::Select(position) => {
            commands::select_position(workflow, position).await?;
            commands::describe_selected(&workflow.snapshot().await)
        }
        ShellCommand::Aspect(aspect) => {
            session.aspect = aspect;
            format!("aspect ratio set to {aspect}")
        }
        ShellCommand::Generate { quantity, prompt } => {
            let prompt = if prompt.is_empty() {
                workflow.snapshot().await.prompt().to_string()
            } else {
                prompt
            };
            let outcome = workflow
                .submit(&prompt, quantity.unwrap_or(1), session.aspect)
                .await?;
            commands::describe_outcome(&outcome)
        }
        ShellCommand::Edit => {
            let edit = workflow.begin_edit().await?;
            format!(
                "editing id {} with seed {}; current prompt:\n{}\n\
                 submit with 'gen <new prompt>' or 'gen' to keep it",
                edit.image_id, edit.seed, edit.prompt
            )
        }
        ShellCommand::Cancel => {
            workflow.cancel_edit().await;
            "edit cancelled".to_string()
        }
        ShellCommand::Retry => {
            let image = workflow.retry(session.aspect).await?;
            format!("regenerated id {} with seed {}", image.id, image.seed)
        }
        ShellCommand::Delete => {
            let image_id = workflow.delete_current().await?;
            format!("deleted id {image_id}")
        }
        ShellCommand::Prompt => commands::describe_selected(&workflow.snapshot().await),
        ShellCommand::Save(path) => {
            let position = workflow.snapshot().await.selected_index() + 1;
            let path = commands::export_selected(workflow, position, path).await?;
            format!("wrote {}", path.display())
        }
        ShellCommand::Help => HELP.to_string(),
        ShellCommand::Quit => String::new(),
    };
    Ok(text)
}

pub async fn run(workflow: &Workflow, default_aspect: AspectRatio) -> Result<()> {
    let mut events = workflow.subscribe();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                GalleryEvent::UnitFailed { unit, message } => {
                    debug!(unit, %message, "shell: unit failed");
                }
                other => debug!(event = ?other, "shell: gallery event"),
            }
        }
    });

    let mut session = ShellSession {
        aspect: default_aspect,
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", commands::render_list(&workflow.snapshot().await).trim_end());
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("error: {err:#}");
                continue;
            }
        };
        if command == ShellCommand::Quit {
            break;
        }
        match execute(workflow, &mut session, command).await {
            Ok(text) if !text.is_empty() => println!("{text}"),
            Ok(_) => {}
            Err(err) => println!("error: {err:#}"),
        }
    }

    event_log.abort();
    Ok(())
}
