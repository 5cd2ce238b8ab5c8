//! A viewer with no rendering surface: it tracks what the model asked for and
//! reports it on the console.

use livemol_core::viewer::Region;
use livemol_core::{Representation, StructureViewer, ViewerError};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessViewer {
    structure: Option<String>,
    representation: Representation,
    highlights: Vec<Region>,
}

impl Default for HeadlessViewer {
    fn default() -> Self {
        Self {
            structure: None,
            representation: Representation::Cartoon,
            highlights: Vec::new(),
        }
    }
}

impl HeadlessViewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn structure(&self) -> Option<&str> {
        self.structure.as_deref()
    }

    pub fn representation(&self) -> Representation {
        self.representation
    }

    pub fn highlights(&self) -> &[Region] {
        &self.highlights
    }

    fn require_structure(&self) -> Result<&str, ViewerError> {
        self.structure
            .as_deref()
            .ok_or_else(|| ViewerError::Viewer("no structure loaded".to_string()))
    }
}

impl StructureViewer for HeadlessViewer {
    fn load_structure(&mut self, id: &str) -> Result<(), ViewerError> {
        info!(structure = %id, "Loading structure");
        self.structure = Some(id.to_string());
        // A new structure starts from a clean scene.
        self.representation = Representation::Cartoon;
        self.highlights.clear();
        Ok(())
    }

    fn set_representation(&mut self, style: Representation) -> Result<(), ViewerError> {
        let structure = self.require_structure()?;
        info!(%structure, %style, "Changing representation");
        self.representation = style;
        Ok(())
    }

    fn highlight(&mut self, region: &Region) -> Result<(), ViewerError> {
        let structure = self.require_structure()?;
        info!(%structure, %region, "Highlighting residues");
        self.highlights.push(region.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_need_a_structure() {
        let mut viewer = HeadlessViewer::new();
        assert!(viewer.set_representation(Representation::Stick).is_err());
        assert!(
            viewer
                .highlight(&Region { chain: None, start: 1, end: 1 })
                .is_err()
        );
    }

    #[test]
    fn test_load_resets_scene() {
        let mut viewer = HeadlessViewer::new();
        viewer.load_structure("1CRN").unwrap();
        viewer.set_representation(Representation::Surface).unwrap();
        viewer
            .highlight(&Region { chain: Some("A".to_string()), start: 3, end: 7 })
            .unwrap();
        assert_eq!(viewer.highlights().len(), 1);

        viewer.load_structure("4HHB").unwrap();
        assert_eq!(viewer.structure(), Some("4HHB"));
        assert_eq!(viewer.representation(), Representation::Cartoon);
        assert!(viewer.highlights().is_empty());
    }
}
