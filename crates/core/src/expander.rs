//! Combinatorial expansion of prompt lists into job descriptors.
//!
//! Subjects form the outer loop and styles the inner one, so the job order
//! is fixed by the list contents alone. Directive lines in the subject list
//! update the settings as they are reached and only affect later subjects.

use std::path::Path;

use rand::Rng;

use crate::backend::{build_command, compose_prompt, OutputMode, PromptParts};
use crate::directives::{self, is_directive, PromptLists};
use crate::error::CoreError;
use crate::job::{JobDescriptor, OutputTarget};
use crate::naming::{dir_label, output_stem};
use crate::settings::Settings;

/// Pick one entry uniformly at random; an empty list yields `""`.
fn pick<'a, R: Rng + ?Sized>(list: &'a [String], rng: &mut R) -> &'a str {
    if list.is_empty() {
        ""
    } else {
        &list[rng.random_range(0..list.len())]
    }
}

/// Expand `lists` into jobs, applying directives to `settings` on the way.
///
/// `source` is the prompt file path; its name labels the output directory.
/// Output-path collisions are left for the runner to resolve.
pub fn expand<R: Rng + ?Sized>(
    lists: &PromptLists,
    settings: &mut Settings,
    source: &Path,
    rng: &mut R,
) -> Vec<JobDescriptor> {
    let label = dir_label(source);
    let mut jobs = Vec::with_capacity(lists.prompt_subject_count() * lists.styles.len());

    for subject in &lists.subjects {
        if is_directive(subject) {
            match settings.apply_directive(subject) {
                Ok(name) => {
                    tracing::debug!(setting = %name, directive = %subject, "Applied setting")
                }
                Err(e) => tracing::warn!(directive = %subject, error = %e, "Ignoring directive"),
            }
            continue;
        }

        for style in &lists.styles {
            let parts = PromptParts {
                prefix: pick(&lists.prefixes, rng),
                subject,
                style,
                suffix: pick(&lists.suffixes, rng),
            };
            let prompt = compose_prompt(settings.process, parts);
            let seed = rng.random::<u32>();
            let command = build_command(settings, &prompt, seed);

            let output = match settings.process.output_mode() {
                OutputMode::File => OutputTarget::File {
                    dir_label: label.clone(),
                    stem: output_stem(subject, style),
                },
                OutputMode::Directory => OutputTarget::Directory {
                    dir_label: label.clone(),
                },
            };

            jobs.push(JobDescriptor::new(
                settings.process,
                command,
                prompt,
                output,
                seed,
                settings.cuda_device,
            ));
        }
    }

    jobs
}

/// Load `source` and expand it from default settings.
///
/// This is what startup and every reload run.
pub fn expand_source<R: Rng + ?Sized>(
    source: &Path,
    rng: &mut R,
) -> Result<Vec<JobDescriptor>, CoreError> {
    let lists = directives::load(source)?;
    let mut settings = Settings::default();
    Ok(expand(&lists, &mut settings, source, rng))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
