//! Placeholder expansion for configured tool chains.

use std::path::{Path, PathBuf};
use tirtha_protocol::ToolStep;

/// Values substituted into step arguments.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub images_dir: PathBuf,
    pub run_dir: PathBuf,
    /// Where the chain must leave its artifact.
    pub output: PathBuf,
    pub max_iter: u32,
    pub site_id: String,
    pub run_id: String,
}

impl ToolContext {
    /// Replace `{images_dir}`, `{run_dir}`, `{output}`, `{max_iter}`,
    /// `{site_id}` and `{run_id}`. Unknown braces are left alone.
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{images_dir}", &path_str(&self.images_dir))
            .replace("{run_dir}", &path_str(&self.run_dir))
            .replace("{output}", &path_str(&self.output))
            .replace("{max_iter}", &self.max_iter.to_string())
            .replace("{site_id}", &self.site_id)
            .replace("{run_id}", &self.run_id)
    }

    pub fn resolve(&self, steps: &[ToolStep]) -> Vec<ResolvedStep> {
        steps
            .iter()
            .map(|step| ResolvedStep {
                name: step.name.clone(),
                program: self.expand(&step.program),
                args: step.args.iter().map(|arg| self.expand(arg)).collect(),
            })
            .collect()
    }
}

/// A step with every placeholder substituted, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
}

impl ResolvedStep {
    /// Shell-like rendering for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Expand `{image}` in a classifier step.
pub fn resolve_for_image(step: &ToolStep, image: &Path) -> ResolvedStep {
    let image = path_str(image);
    ResolvedStep {
        name: step.name.clone(),
        program: step.program.clone(),
        args: step
            .args
            .iter()
            .map(|arg| arg.replace("{image}", &image))
            .collect(),
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ToolContext {
        ToolContext {
            images_dir: PathBuf::from("/runs/r1/images"),
            run_dir: PathBuf::from("/runs/r1"),
            output: PathBuf::from("/runs/r1/output/r1.splat"),
            max_iter: 20000,
            site_id: "s1".into(),
            run_id: "r1".into(),
        }
    }

    #[test]
    fn expands_all_placeholders() {
        let steps = vec![ToolStep::new(
            "train",
            "splat-train",
            &["--source", "{run_dir}/sparse", "-i", "{images_dir}", "--iterations", "{max_iter}", "-o", "{output}", "{site_id}:{run_id}"],
        )];
        let resolved = context().resolve(&steps);
        assert_eq!(
            resolved[0].args,
            vec![
                "--source",
                "/runs/r1/sparse",
                "-i",
                "/runs/r1/images",
                "--iterations",
                "20000",
                "-o",
                "/runs/r1/output/r1.splat",
                "s1:r1"
            ]
        );
        assert!(resolved[0].command_line().starts_with("splat-train --source"));
    }

    #[test]
    fn unknown_placeholders_pass_through() {
        assert_eq!(context().expand("{gpu}"), "{gpu}");
    }

    #[test]
    fn classifier_image_placeholder() {
        let step = ToolStep::new("nsfw", "classify", &["--image", "{image}"]);
        let resolved = resolve_for_image(&step, Path::new("/up/a.jpg"));
        assert_eq!(resolved.args, vec!["--image", "/up/a.jpg"]);
    }
}
