//! OpenCV cascade XML reader.
//!
//! Two layouts are in circulation:
//!
//! - `opencv-cascade-classifier`, written by `opencv_traincascade`: trees as
//!   flat `internalNodes` / `leafValues` lists over a shared feature table.
//! - `opencv-haar-classifier`, the older haartraining output: every tree node
//!   carries its own feature and `left_val` / `left_node` children.
//!
//! Only upright Haar features are read. Tilted features, LBP models and
//! tree-structured stage graphs are rejected.

use anyhow::{anyhow, Context, Result};
use roxmltree::{Document, Node};
use std::str::FromStr;

use crate::detect::backends::cascade::{
    CascadeModel, CascadeStage, HaarFeature, TreeNode, WeakClassifier,
};

/// Subtracted from every stage threshold on load, matching OpenCV.
const STAGE_THRESHOLD_EPS: f64 = 1e-5;

pub fn parse(xml: &str) -> Result<CascadeModel> {
    let doc = Document::parse(xml).context("parse cascade xml")?;
    let root = doc.root_element();
    let cascade = if root.tag_name().name() == "opencv_storage" {
        elements(root)
            .next()
            .ok_or_else(|| anyhow!("opencv_storage holds no cascade"))?
    } else {
        root
    };
    match cascade.attribute("type_id") {
        Some("opencv-cascade-classifier") => parse_current(cascade),
        Some("opencv-haar-classifier") => parse_legacy(cascade),
        Some(other) => Err(anyhow!("unsupported cascade type '{}'", other)),
        None if find(cascade, "size").is_some() => parse_legacy(cascade),
        None => parse_current(cascade),
    }
}

fn parse_current(cascade: Node<'_, '_>) -> Result<CascadeModel> {
    expect_text(cascade, "stageType", "BOOST")?;
    expect_text(cascade, "featureType", "HAAR")?;
    if let Some(cats) = find(cascade, "featureParams").and_then(|p| find(p, "maxCatCount")) {
        if number::<u32>(cats)? != 0 {
            return Err(anyhow!("categorical features are not supported"));
        }
    }
    let width = number::<u32>(child(cascade, "width")?)?;
    let height = number::<u32>(child(cascade, "height")?)?;

    let features = elements(child(cascade, "features")?)
        .enumerate()
        .map(|(i, f)| parse_feature(f).with_context(|| format!("feature {}", i)))
        .collect::<Result<Vec<_>>>()?;

    let mut stages = Vec::new();
    for (i, stage) in elements(child(cascade, "stages")?).enumerate() {
        let threshold = number::<f64>(child(stage, "stageThreshold")?)? - STAGE_THRESHOLD_EPS;
        let classifiers = elements(child(stage, "weakClassifiers")?)
            .map(parse_current_tree)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("stage {}", i))?;
        stages.push(CascadeStage {
            threshold,
            classifiers,
        });
    }

    Ok(CascadeModel {
        window: [width, height],
        features,
        stages,
    })
}

/// `internalNodes` holds `left right feature threshold` per node.
fn parse_current_tree(weak: Node<'_, '_>) -> Result<WeakClassifier> {
    let raw = text(child(weak, "internalNodes")?);
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() % 4 != 0 {
        return Err(anyhow!(
            "internalNodes must hold groups of four values, found {}",
            tokens.len()
        ));
    }
    let nodes = tokens
        .chunks(4)
        .map(|node| {
            Ok(TreeNode {
                left: token(node[0])?,
                right: token(node[1])?,
                feature: token(node[2])?,
                threshold: token(node[3])?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let leaves = numbers::<f64>(child(weak, "leafValues")?)?;
    Ok(WeakClassifier { nodes, leaves })
}

fn parse_legacy(cascade: Node<'_, '_>) -> Result<CascadeModel> {
    let size = numbers::<u32>(child(cascade, "size")?)?;
    let [width, height] = size[..] else {
        return Err(anyhow!("<size> must hold width and height"));
    };

    let mut features = Vec::new();
    let mut stages = Vec::new();
    for (i, stage) in elements(child(cascade, "stages")?).enumerate() {
        if let Some(parent) = find(stage, "parent") {
            if number::<i64>(parent)? != i as i64 - 1 {
                return Err(anyhow!("tree-structured cascades are not supported"));
            }
        }
        let threshold = number::<f64>(child(stage, "stage_threshold")?)? - STAGE_THRESHOLD_EPS;
        let mut classifiers = Vec::new();
        for (j, tree) in elements(child(stage, "trees")?).enumerate() {
            let weak = parse_legacy_tree(tree, &mut features)
                .with_context(|| format!("stage {} tree {}", i, j))?;
            classifiers.push(weak);
        }
        stages.push(CascadeStage {
            threshold,
            classifiers,
        });
    }

    Ok(CascadeModel {
        window: [width, height],
        features,
        stages,
    })
}

/// Legacy trees inline their features; each one is appended to `features`.
fn parse_legacy_tree(tree: Node<'_, '_>, features: &mut Vec<HaarFeature>) -> Result<WeakClassifier> {
    let mut nodes = Vec::new();
    let mut leaves = Vec::new();
    for node in elements(tree) {
        features.push(parse_feature(child(node, "feature")?)?);
        nodes.push(TreeNode {
            feature: features.len() - 1,
            threshold: number(child(node, "threshold")?)?,
            left: legacy_branch(node, "left_val", "left_node", &mut leaves)?,
            right: legacy_branch(node, "right_val", "right_node", &mut leaves)?,
        });
    }
    if nodes.is_empty() {
        return Err(anyhow!("tree has no nodes"));
    }
    Ok(WeakClassifier { nodes, leaves })
}

/// A leaf value becomes `-index` into `leaves`; a node reference stays positive.
fn legacy_branch(node: Node<'_, '_>, value: &str, next: &str, leaves: &mut Vec<f64>) -> Result<i32> {
    if let Some(leaf) = find(node, value) {
        leaves.push(number(leaf)?);
        let index = i32::try_from(leaves.len() - 1).context("too many leaves")?;
        return Ok(-index);
    }
    let index = number::<i32>(child(node, next)?)?;
    if index <= 0 {
        return Err(anyhow!("<{}> must point past the root, found {}", next, index));
    }
    Ok(index)
}

fn parse_feature(feature: Node<'_, '_>) -> Result<HaarFeature> {
    if let Some(tilted) = find(feature, "tilted") {
        if number::<u32>(tilted)? != 0 {
            return Err(anyhow!("tilted features are not supported"));
        }
    }
    let rects = elements(child(feature, "rects")?)
        .map(parse_rect)
        .collect::<Result<Vec<_>>>()?;
    Ok(HaarFeature { rects })
}

fn parse_rect(rect: Node<'_, '_>) -> Result<(u32, u32, u32, u32, f64)> {
    let raw = text(rect);
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let [x, y, w, h, weight] = tokens[..] else {
        return Err(anyhow!("rectangle needs five values, found '{}'", raw.trim()));
    };
    Ok((token(x)?, token(y)?, token(w)?, token(h)?, token(weight)?))
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn find<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    elements(node).find(|n| n.tag_name().name() == name)
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>> {
    find(node, name).ok_or_else(|| anyhow!("<{}> has no <{}>", node.tag_name().name(), name))
}

/// Text content without comments, which legacy files scatter between values.
fn text(node: Node<'_, '_>) -> String {
    node.children()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

fn expect_text(node: Node<'_, '_>, name: &str, expected: &str) -> Result<()> {
    match find(node, name) {
        Some(found) if text(found).trim() != expected => Err(anyhow!(
            "<{}> is '{}', only {} is supported",
            name,
            text(found).trim(),
            expected
        )),
        _ => Ok(()),
    }
}

fn token<T>(raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .with_context(|| format!("bad number '{}'", raw))
}

fn number<T>(node: Node<'_, '_>) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    token(text(node).trim()).with_context(|| format!("in <{}>", node.tag_name().name()))
}

fn numbers<T>(node: Node<'_, '_>) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    text(node)
        .split_whitespace()
        .map(token)
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("in <{}>", node.tag_name().name()))
}
