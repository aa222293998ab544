//! visualization.rs - Network Schematic Rendering
//!
//! Renders a network as a 2D schematic: channels as lines scaled by their
//! flow rate, nodes as circles colored by pressure, CFD modules as framed
//! rectangles.

use crate::network::{EdgeKind, Network};
use plotters::prelude::*;

/// Plot the network with its current pressures and flow rates
pub fn plot_network(
    network: &Network,
    output_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(output_path, (1024, 768)).into_drawing_area();
    root.fill(&WHITE)?;

    let (min, max) = bounds(network);
    let margin_x = 0.1 * (max.0 - min.0).max(1e-6);
    let margin_y = 0.1 * (max.1 - min.1).max(1e-6);
    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(
            (min.0 - margin_x)..(max.0 + margin_x),
            (min.1 - margin_y)..(max.1 + margin_y),
        )?;
    chart.configure_mesh().disable_mesh().draw()?;

    let max_flow = network
        .edges()
        .iter()
        .filter_map(|e| e.flow_rate().ok())
        .fold(0.0f64, |acc, q| acc.max(q.abs()));

    for edge in network.edges() {
        let a = network.node(edge.node_a)?.position;
        let b = network.node(edge.node_b)?.position;
        match edge.kind {
            EdgeKind::Channel(_) => {
                let weight = match edge.flow_rate() {
                    Ok(q) if max_flow > 0.0 => 1 + (3.0 * q.abs() / max_flow) as u32,
                    _ => 1,
                };
                chart.draw_series(LineSeries::new(vec![a, b], BLACK.stroke_width(weight)))?;
            }
            EdgeKind::PressurePump { .. } | EdgeKind::FlowRatePump { .. } => {
                chart.draw_series(LineSeries::new(vec![a, b], BLUE.stroke_width(2)))?;
            }
            EdgeKind::Membrane(_) | EdgeKind::Tank(_) => {
                chart.draw_series(LineSeries::new(vec![a, b], GREEN.stroke_width(1)))?;
            }
            EdgeKind::CfdPort { .. } => {}
        }
    }

    let max_pressure = network
        .nodes()
        .iter()
        .fold(0.0f64, |acc, n| acc.max(n.pressure.abs()));
    chart.draw_series(network.nodes().iter().map(|node| {
        let intensity = if max_pressure > 0.0 {
            (node.pressure.abs() / max_pressure * 255.0) as u8
        } else {
            0
        };
        let color = RGBColor(intensity, 0, 255 - intensity);
        Circle::new(node.position, 4, color.filled())
    }))?;

    for module in network.modules() {
        let (x0, y0) = module.position;
        let (x1, y1) = (x0 + module.size.0, y0 + module.size.1);
        chart.draw_series(std::iter::once(Rectangle::new(
            [(x0, y0), (x1, y1)],
            RED.stroke_width(2),
        )))?;
    }

    root.present()?;
    println!("Network schematic saved to {}", output_path);
    Ok(())
}

fn bounds(network: &Network) -> ((f64, f64), (f64, f64)) {
    let mut min = (f64::INFINITY, f64::INFINITY);
    let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for node in network.nodes() {
        min.0 = min.0.min(node.position.0);
        min.1 = min.1.min(node.position.1);
        max.0 = max.0.max(node.position.0);
        max.1 = max.1.max(node.position.1);
    }
    for module in network.modules() {
        min.0 = min.0.min(module.position.0);
        min.1 = min.1.min(module.position.1);
        max.0 = max.0.max(module.position.0 + module.size.0);
        max.1 = max.1.max(module.position.1 + module.size.1);
    }
    if !min.0.is_finite() {
        return ((0.0, 0.0), (1.0, 1.0));
    }
    (min, max)
}
