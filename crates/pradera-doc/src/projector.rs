//! Blocks → document.
//!
//! Pure and order-preserving: one node per block, in the order given. The
//! caller supplies blocks already sorted by `block_order`; nothing here sorts.

use pradera_types::{Block, BlockDto};

use crate::{DocError, Document, Node};

/// Project ordered blocks into a document.
pub fn project<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> Document {
    Document::new(blocks.into_iter().map(Node::from_block).collect())
}

/// Project ordered wire records, validating each record's type first.
///
/// Fails on the first record whose type is outside the enumeration; no
/// partial document is produced.
pub fn project_records(records: &[BlockDto]) -> Result<Document, DocError> {
    let blocks = records
        .iter()
        .cloned()
        .map(Block::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(project(&blocks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NodeType, TITLE_LEVEL};
    use chrono::Utc;
    use pradera_types::{BlockId, BlockType, UserId, UserRef};

    fn block(id: i64, ty: BlockType, content: &str) -> Block {
        Block::new(BlockId::new(id), ty, content, Utc::now(), UserRef::new(UserId::new(1)))
    }

    #[test]
    fn preserves_order_for_all_small_lengths() {
        let all = vec![
            block(5, BlockType::Paragraph, "five"),
            block(2, BlockType::Title, "two"),
            block(9, BlockType::Chapter, "nine"),
        ];
        for len in 0..=all.len() {
            let doc = project(&all[..len]);
            assert_eq!(doc.len(), len);
            let ids: Vec<_> = doc.block_ids();
            let expected: Vec<_> = all[..len].iter().map(|b| b.id).collect();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn type_mapping_is_exhaustive() {
        for (ty, node_type) in [
            (BlockType::Title, NodeType::Heading),
            (BlockType::Paragraph, NodeType::Paragraph),
            (BlockType::Chapter, NodeType::Chapter),
        ] {
            let doc = project(&[block(1, ty, "x")]);
            assert_eq!(doc.nodes()[0].node_type, node_type);
            assert_eq!(doc.to_value().unwrap()["content"][0]["type"], ty.editor_type());
        }
    }

    #[test]
    fn titles_get_level_one() {
        let doc = project(&[block(1, BlockType::Title, "T"), block(2, BlockType::Paragraph, "p")]);
        assert_eq!(doc.nodes()[0].attrs.level, Some(TITLE_LEVEL));
        assert_eq!(doc.nodes()[1].attrs.level, None);
        doc.validate().unwrap();
    }

    #[test]
    fn content_is_verbatim() {
        let raw = "  <b>not markup</b> & \"quotes\"\n";
        let doc = project(&[block(1, BlockType::Paragraph, raw)]);
        assert_eq!(doc.nodes()[0].text(), raw);
    }

    #[test]
    fn unknown_record_type_fails_projection() {
        let mut record: BlockDto = block(1, BlockType::Paragraph, "x").into();
        record.block_type = "SIDEBAR".into();
        let good: BlockDto = block(2, BlockType::Title, "ok").into();
        let err = project_records(&[good, record]).unwrap_err();
        assert_eq!(
            err,
            DocError::UnknownBlockType {
                block_id: Some(BlockId::new(1)),
                value: "SIDEBAR".into()
            }
        );
    }

    #[test]
    fn non_canonical_case_is_not_coerced() {
        for value in ["title", "Chapter", "paragraph"] {
            let mut record: BlockDto = block(4, BlockType::Paragraph, "x").into();
            record.block_type = value.into();
            assert_eq!(
                project_records(&[record]).unwrap_err(),
                DocError::UnknownBlockType {
                    block_id: Some(BlockId::new(4)),
                    value: value.into()
                }
            );
        }
    }
}
