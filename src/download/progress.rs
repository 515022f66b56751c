// ShelfSync - Offline Library Sync for Audiobookshelf
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Progress weighting
//!
//! Every asset of an item carries the share of the item's progress it represents.
//! Covers get 10%, supplementary documents 10% and audio files 80%, each share
//! split evenly inside its category. Shares of empty categories are handed to the
//! remaining ones so the weights of an item always sum to 1.0.

const COVER_SHARE: f64 = 0.1;
const PDF_SHARE: f64 = 0.1;
const AUDIO_SHARE: f64 = 0.8;

/// Per-asset weight of each category
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressWeights {
    pub cover: f64,
    pub pdf: f64,
    pub audio: f64,
}

impl ProgressWeights {
    pub fn compute(covers: usize, pdfs: usize, audio_files: usize) -> Self {
        let share = |count: usize, share: f64| if count == 0 { 0.0 } else { share };
        let total = share(covers, COVER_SHARE) + share(pdfs, PDF_SHARE) + share(audio_files, AUDIO_SHARE);

        let individual = |count: usize, category: f64| {
            if count == 0 || total == 0.0 {
                0.0
            } else {
                category / total / count as f64
            }
        };

        Self {
            cover: individual(covers, COVER_SHARE),
            pdf: individual(pdfs, PDF_SHARE),
            audio: individual(audio_files, AUDIO_SHARE),
        }
    }
}
