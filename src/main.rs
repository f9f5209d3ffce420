// src/main.rs
//
// Offline sanity demo: build a small patch, run it through a manager for a
// few blocks and print what comes out. No audio device involved; the host
// callback normally drives `tick` the same way.

use audiograph::{
    BLOCK_SIZE, GraphDef, GraphManager, NodeDef, NodeTypeRegistry, PlugValue,
    register_core_nodes,
};

fn main() {
    env_logger::init();

    let sample_rate = 48_000.0f32;
    let dt = BLOCK_SIZE as f32 / sample_rate;

    let mut registry = NodeTypeRegistry::new();
    register_core_nodes(&mut registry);

    // 220 Hz sine, tremolo from a 2 Hz ramp mapped to [0.2, 1.0]
    let mut def = GraphDef::new();
    let lfo = def.add_node_def(NodeDef::new(0, "osc.ramp").with_input("frequency", "2"));
    let depth = def.add_node_def(
        NodeDef::new(0, "util.map")
            .with_input("out_min", "0.2")
            .with_input("out_max", "1"),
    );
    let osc = def.add_node_def(NodeDef::new(0, "osc.sine").with_input("frequency", "220"));
    let gain = def.add_node("util.gain");
    def.connect(lfo, 0, depth, 0);
    def.connect(osc, 0, gain, 0);
    def.connect(depth, 0, gain, 1);

    let manager = GraphManager::new(registry);
    manager.add_def("demo", def);

    let Some(instance) = manager.create_instance("demo") else {
        eprintln!("could not create demo instance");
        return;
    };

    println!("ticking {} blocks of {} samples...", 8, BLOCK_SIZE);

    for block in 0..8 {
        manager.tick(dt);

        let peak = manager
            .with_graph(instance, |graph| {
                graph
                    .node(gain)
                    .and_then(|entry| entry.outputs.first())
                    .and_then(PlugValue::as_signal)
                    .map(|signal| {
                        signal
                            .samples()
                            .iter()
                            .fold(0.0f32, |m, s| m.max(s.abs()))
                    })
                    .unwrap_or(0.0)
            })
            .unwrap_or(0.0);

        println!("block {block}: peak {peak:.3}");
    }

    manager.free(instance);
    println!("done.");
}
