//! Project CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde::Deserialize;

use crate::cli::app::App;
use crate::cli::output::{first_line, list_table, output, render_list, CommandOutput};
use crate::domain::models::{Config, Project, Sample};

#[derive(Args, Debug)]
pub struct ProjectArgs {
    #[command(subcommand)]
    pub command: ProjectCommands,
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Import a prompt and its labelled dataset from a YAML or JSON file
    Import {
        /// File with `prompt` and `samples` (each a `query` and `target`)
        file: PathBuf,
        /// Project id (defaults to the id in the file, then the file stem)
        #[arg(long)]
        id: Option<String>,
        /// Replace an existing project with the same id
        #[arg(short, long)]
        force: bool,
    },
    /// List projects
    List,
    /// Show a project's working prompt and dataset size
    Show {
        /// Project id
        id: String,
    },
}

/// On-disk import format.
#[derive(Debug, Deserialize)]
struct ProjectFile {
    id: Option<String>,
    name: Option<String>,
    prompt: String,
    samples: Vec<SampleEntry>,
}

#[derive(Debug, Deserialize)]
struct SampleEntry {
    query: String,
    target: String,
}

fn parse_project_file(path: &Path, id_override: Option<String>) -> Result<Project> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    // JSON is a subset of YAML, one parser covers both.
    let file: ProjectFile = serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let id = id_override
        .or(file.id)
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .context("Could not derive a project id, pass --id")?;
    if file.prompt.trim().is_empty() {
        bail!("Project prompt is empty");
    }
    if file.samples.is_empty() {
        bail!("Project has no samples");
    }

    let dataset = file
        .samples
        .into_iter()
        .enumerate()
        .map(|(i, s)| Sample::new(i, s.query, s.target))
        .collect();
    let name = file.name.unwrap_or_else(|| id.clone());
    Ok(Project::new(id, name, file.prompt, dataset))
}

#[derive(Debug, serde::Serialize)]
pub struct ProjectOutput {
    pub id: String,
    pub name: String,
    pub samples: usize,
    pub prompt: String,
    pub updated_at: String,
}

impl From<&Project> for ProjectOutput {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            samples: project.dataset.len(),
            prompt: project.prompt.clone(),
            updated_at: project.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

impl CommandOutput for ProjectOutput {
    fn to_human(&self) -> String {
        format!(
            "Project: {} ({})\nSamples: {}\nUpdated: {}\n\nPrompt:\n{}",
            self.id, self.name, self.samples, self.updated_at, self.prompt
        )
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ProjectListOutput {
    pub projects: Vec<ProjectOutput>,
    pub total: usize,
}

impl CommandOutput for ProjectListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "name", "samples", "updated", "prompt"]);
        for p in &self.projects {
            table.add_row(vec![
                p.id.clone(),
                p.name.clone(),
                p.samples.to_string(),
                p.updated_at.clone(),
                first_line(&p.prompt, 40),
            ]);
        }
        render_list("project", &table, self.total)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ProjectImportOutput {
    pub success: bool,
    pub message: String,
    pub project: ProjectOutput,
}

impl CommandOutput for ProjectImportOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

pub async fn execute(args: ProjectArgs, config: Config, json_mode: bool) -> Result<()> {
    let app = App::open(config).await?;

    match args.command {
        ProjectCommands::Import { file, id, force } => {
            let project = parse_project_file(&file, id)?;
            if app.projects.get(&project.id).await?.is_some() {
                if !force {
                    bail!("Project {} already exists, pass --force to replace it", project.id);
                }
                app.projects.delete(&project.id).await?;
            }
            app.projects.create(&project).await?;

            let out = ProjectImportOutput {
                success: true,
                message: format!(
                    "Imported project {} with {} samples",
                    project.id,
                    project.dataset.len()
                ),
                project: ProjectOutput::from(&project),
            };
            output(&out, json_mode);
        }

        ProjectCommands::List => {
            let projects = app.projects.list().await?;
            let out = ProjectListOutput {
                total: projects.len(),
                projects: projects.iter().map(ProjectOutput::from).collect(),
            };
            output(&out, json_mode);
        }

        ProjectCommands::Show { id } => {
            let project = app.project(&id).await?;
            output(&ProjectOutput::from(&project), json_mode);
        }
    }

    Ok(())
}
