use serde::{Deserialize, Serialize};

use super::{Document, Extraction, SlideSummary, TraversalOptions};
use crate::fragment::{FragmentSet, TranslationResult};

/// A presentation as a JSON tree of slides and shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    #[serde(default)]
    pub shapes: Vec<Shape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Shape variants, resolved once at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_title: bool,
    },
    Table {
        rows: Vec<Vec<String>>,
    },
    Chart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Group {
        shapes: Vec<Shape>,
    },
    /// Pictures, connectors and anything else without translatable text
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Text,
    Table,
    Chart,
    Group,
    Unknown,
}

impl Shape {
    pub const fn kind(&self) -> ShapeKind {
        match self {
            Self::Text { .. } => ShapeKind::Text,
            Self::Table { .. } => ShapeKind::Table,
            Self::Chart { .. } => ShapeKind::Chart,
            Self::Group { .. } => ShapeKind::Group,
            Self::Unknown => ShapeKind::Unknown,
        }
    }
}

fn join_path(path: &[usize]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("_")
}

fn shape_id(slide: usize, path: &[usize]) -> String {
    format!("slide_{slide}_shape_{}", join_path(path))
}

fn table_cell_id(slide: usize, path: &[usize], row: usize, col: usize) -> String {
    format!("slide_{slide}_table_{}_r{row}_c{col}", join_path(path))
}

fn chart_title_id(slide: usize, path: &[usize]) -> String {
    format!("slide_{slide}_chart_{}_title", join_path(path))
}

fn notes_id(slide: usize) -> String {
    format!("slide_{slide}_notes")
}

struct Collector<'a> {
    options: &'a TraversalOptions,
    fragments: FragmentSet,
}

impl Collector<'_> {
    fn push(&mut self, id: String, text: &str, summary: &mut SlideSummary) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        summary.content.push(text.to_string());
        self.fragments.insert(id, text.to_string());
        true
    }

    fn shape(
        &mut self,
        shape: &Shape,
        slide: usize,
        path: &mut Vec<usize>,
        depth: usize,
        summary: &mut SlideSummary,
    ) {
        match shape {
            Shape::Text { text, is_title } => {
                if self.push(shape_id(slide, path), text, summary)
                    && *is_title
                    && summary.title.is_empty()
                {
                    summary.title = text.trim().to_string();
                }
            }
            Shape::Table { rows } if self.options.include_tables => {
                for (r, row) in rows.iter().enumerate() {
                    for (c, cell) in row.iter().enumerate() {
                        self.push(table_cell_id(slide, path, r, c), cell, summary);
                    }
                }
            }
            Shape::Chart { title: Some(title) } if self.options.include_charts => {
                self.push(chart_title_id(slide, path), title, summary);
            }
            Shape::Group { shapes } if depth < self.options.max_group_depth => {
                for (j, child) in shapes.iter().enumerate() {
                    path.push(j);
                    self.shape(child, slide, path, depth + 1, summary);
                    path.pop();
                }
            }
            _ => {}
        }
    }
}

fn apply_shape(
    shape: &mut Shape,
    slide: usize,
    path: &mut Vec<usize>,
    translations: &TranslationResult,
) -> usize {
    match shape {
        Shape::Text { text, .. } => replace(text, &shape_id(slide, path), translations),
        Shape::Table { rows } => {
            let mut applied = 0;
            for (r, row) in rows.iter_mut().enumerate() {
                for (c, cell) in row.iter_mut().enumerate() {
                    applied += replace(cell, &table_cell_id(slide, path, r, c), translations);
                }
            }
            applied
        }
        Shape::Chart { title: Some(title) } => {
            replace(title, &chart_title_id(slide, path), translations)
        }
        Shape::Group { shapes } => {
            let mut applied = 0;
            for (j, child) in shapes.iter_mut().enumerate() {
                path.push(j);
                applied += apply_shape(child, slide, path, translations);
                path.pop();
            }
            applied
        }
        Shape::Chart { title: None } | Shape::Unknown => 0,
    }
}

fn replace(target: &mut String, id: &str, translations: &TranslationResult) -> usize {
    match translations.get(id) {
        Some(translated) => {
            target.clone_from(translated);
            1
        }
        None => 0,
    }
}

impl Document for Deck {
    fn extract(&self, options: &TraversalOptions) -> Extraction {
        let mut collector = Collector {
            options,
            fragments: FragmentSet::new(),
        };
        let mut context = Vec::with_capacity(self.slides.len());

        for (index, slide) in self.slides.iter().enumerate() {
            let number = index + 1;
            let mut summary = SlideSummary {
                slide_number: number,
                ..SlideSummary::default()
            };

            let mut path = Vec::new();
            for (i, shape) in slide.shapes.iter().enumerate() {
                path.push(i);
                collector.shape(shape, number, &mut path, 0, &mut summary);
                path.pop();
            }

            if options.include_notes
                && let Some(notes) = &slide.notes
            {
                collector.push(notes_id(number), notes, &mut summary);
            }

            context.push(summary);
        }

        Extraction {
            fragments: collector.fragments,
            context,
        }
    }

    fn apply(&mut self, translations: &TranslationResult) -> usize {
        let mut applied = 0;
        for (index, slide) in self.slides.iter_mut().enumerate() {
            let number = index + 1;
            let mut path = Vec::new();
            for (i, shape) in slide.shapes.iter_mut().enumerate() {
                path.push(i);
                applied += apply_shape(shape, number, &mut path, translations);
                path.pop();
            }
            if let Some(notes) = slide.notes.as_mut() {
                applied += replace(notes, &notes_id(number), translations);
            }
        }
        applied
    }
}
