use crate::optimizer::Adam;
use ndarray::{s, Array1, Array2, Array3, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

const BATCH_NORM_EPS: f64 = 1e-3;
const BATCH_NORM_MOMENTUM: f64 = 0.99;

/// Single LSTM layer processing whole batches of sequences.
///
/// Weight naming follows the gate layout: `w_*` maps the layer input, `u_*`
/// the previous hidden state, for the input (i), forget (f), cell candidate
/// (g) and output (o) gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmLayer {
    pub input_size: usize,
    pub hidden_size: usize,

    w_i: Array2<f64>,
    u_i: Array2<f64>,
    b_i: Array1<f64>,

    w_f: Array2<f64>,
    u_f: Array2<f64>,
    b_f: Array1<f64>,

    w_g: Array2<f64>,
    u_g: Array2<f64>,
    b_g: Array1<f64>,

    w_o: Array2<f64>,
    u_o: Array2<f64>,
    b_o: Array1<f64>,

    #[serde(skip)]
    cache: Option<LstmCache>,
}

#[derive(Debug, Clone)]
struct LstmCache {
    inputs: Array3<f64>,
    i_gates: Array3<f64>,
    f_gates: Array3<f64>,
    g_gates: Array3<f64>,
    o_gates: Array3<f64>,
    cells: Array3<f64>,
    hiddens: Array3<f64>,
}

/// Accumulated parameter gradients from one backward pass.
#[derive(Debug, Clone)]
pub struct LstmGrads {
    dw_i: Array2<f64>,
    du_i: Array2<f64>,
    db_i: Array1<f64>,
    dw_f: Array2<f64>,
    du_f: Array2<f64>,
    db_f: Array1<f64>,
    dw_g: Array2<f64>,
    du_g: Array2<f64>,
    db_g: Array1<f64>,
    dw_o: Array2<f64>,
    du_o: Array2<f64>,
    db_o: Array1<f64>,
}

impl LstmGrads {
    fn zeros(input_size: usize, hidden_size: usize) -> Self {
        Self {
            dw_i: Array2::zeros((hidden_size, input_size)),
            du_i: Array2::zeros((hidden_size, hidden_size)),
            db_i: Array1::zeros(hidden_size),
            dw_f: Array2::zeros((hidden_size, input_size)),
            du_f: Array2::zeros((hidden_size, hidden_size)),
            db_f: Array1::zeros(hidden_size),
            dw_g: Array2::zeros((hidden_size, input_size)),
            du_g: Array2::zeros((hidden_size, hidden_size)),
            db_g: Array1::zeros(hidden_size),
            dw_o: Array2::zeros((hidden_size, input_size)),
            du_o: Array2::zeros((hidden_size, hidden_size)),
            db_o: Array1::zeros(hidden_size),
        }
    }
}

impl LstmLayer {
    pub fn new(input_size: usize, hidden_size: usize, rng: &mut StdRng) -> Self {
        let limit = (1.0 / hidden_size as f64).sqrt();
        let weight = |rows: usize, cols: usize, rng: &mut StdRng| {
            Array2::random_using((rows, cols), Uniform::new(-limit, limit), rng)
        };
        Self {
            input_size,
            hidden_size,
            w_i: weight(hidden_size, input_size, rng),
            u_i: weight(hidden_size, hidden_size, rng),
            b_i: Array1::zeros(hidden_size),
            w_f: weight(hidden_size, input_size, rng),
            u_f: weight(hidden_size, hidden_size, rng),
            // Forget gate starts open so early training keeps state.
            b_f: Array1::from_elem(hidden_size, 1.0),
            w_g: weight(hidden_size, input_size, rng),
            u_g: weight(hidden_size, hidden_size, rng),
            b_g: Array1::zeros(hidden_size),
            w_o: weight(hidden_size, input_size, rng),
            u_o: weight(hidden_size, hidden_size, rng),
            b_o: Array1::zeros(hidden_size),
            cache: None,
        }
    }

    /// Forward pass over `[batch, time, input]`, returning the hidden state
    /// at every step `[batch, time, hidden]`. Does not record state; usable
    /// for inference from a shared reference.
    pub fn forward(&self, input: &Array3<f64>) -> Array3<f64> {
        self.run(input).6
    }

    /// Forward pass that records everything `backward` needs.
    pub fn forward_cached(&mut self, input: &Array3<f64>) -> Array3<f64> {
        let (i_gates, f_gates, g_gates, o_gates, cells, inputs, hiddens) = self.run(input);
        self.cache = Some(LstmCache {
            inputs,
            i_gates,
            f_gates,
            g_gates,
            o_gates,
            cells,
            hiddens: hiddens.clone(),
        });
        hiddens
    }

    #[allow(clippy::type_complexity)]
    fn run(
        &self,
        input: &Array3<f64>,
    ) -> (
        Array3<f64>,
        Array3<f64>,
        Array3<f64>,
        Array3<f64>,
        Array3<f64>,
        Array3<f64>,
        Array3<f64>,
    ) {
        let (batch, steps, _) = input.dim();
        let hidden = self.hidden_size;

        let mut i_gates = Array3::zeros((batch, steps, hidden));
        let mut f_gates = Array3::zeros((batch, steps, hidden));
        let mut g_gates = Array3::zeros((batch, steps, hidden));
        let mut o_gates = Array3::zeros((batch, steps, hidden));
        let mut cells = Array3::zeros((batch, steps, hidden));
        let mut hiddens = Array3::zeros((batch, steps, hidden));

        let mut h_prev = Array2::zeros((batch, hidden));
        let mut c_prev: Array2<f64> = Array2::zeros((batch, hidden));

        for t in 0..steps {
            let x_t = input.slice(s![.., t, ..]);

            let i_t = (&x_t.dot(&self.w_i.t()) + &h_prev.dot(&self.u_i.t()) + &self.b_i)
                .mapv(sigmoid);
            let f_t = (&x_t.dot(&self.w_f.t()) + &h_prev.dot(&self.u_f.t()) + &self.b_f)
                .mapv(sigmoid);
            let g_t = (&x_t.dot(&self.w_g.t()) + &h_prev.dot(&self.u_g.t()) + &self.b_g)
                .mapv(f64::tanh);
            let o_t = (&x_t.dot(&self.w_o.t()) + &h_prev.dot(&self.u_o.t()) + &self.b_o)
                .mapv(sigmoid);

            let c_t = &f_t * &c_prev + &i_t * &g_t;
            let h_t = &o_t * &c_t.mapv(f64::tanh);

            i_gates.slice_mut(s![.., t, ..]).assign(&i_t);
            f_gates.slice_mut(s![.., t, ..]).assign(&f_t);
            g_gates.slice_mut(s![.., t, ..]).assign(&g_t);
            o_gates.slice_mut(s![.., t, ..]).assign(&o_t);
            cells.slice_mut(s![.., t, ..]).assign(&c_t);
            hiddens.slice_mut(s![.., t, ..]).assign(&h_t);

            h_prev = h_t;
            c_prev = c_t;
        }

        (i_gates, f_gates, g_gates, o_gates, cells, input.clone(), hiddens)
    }

    /// Backpropagation through time. `d_hiddens` carries the upstream
    /// gradient for every step (zero-filled where a step produced no
    /// output). Returns the gradient w.r.t. the layer input.
    pub fn backward(&mut self, d_hiddens: &Array3<f64>) -> (Array3<f64>, LstmGrads) {
        let cache = self
            .cache
            .take()
            .expect("forward_cached must run before backward");
        let (batch, steps, _) = cache.inputs.dim();
        let hidden = self.hidden_size;

        let mut grads = LstmGrads::zeros(self.input_size, hidden);
        let mut d_input = Array3::zeros((batch, steps, self.input_size));
        let mut dh_next: Array2<f64> = Array2::zeros((batch, hidden));
        let mut dc_next: Array2<f64> = Array2::zeros((batch, hidden));

        for t in (0..steps).rev() {
            let i_t = cache.i_gates.slice(s![.., t, ..]);
            let f_t = cache.f_gates.slice(s![.., t, ..]);
            let g_t = cache.g_gates.slice(s![.., t, ..]);
            let o_t = cache.o_gates.slice(s![.., t, ..]);
            let c_t = cache.cells.slice(s![.., t, ..]);
            let x_t = cache.inputs.slice(s![.., t, ..]);

            let (h_prev, c_prev) = if t > 0 {
                (
                    cache.hiddens.slice(s![.., t - 1, ..]).to_owned(),
                    cache.cells.slice(s![.., t - 1, ..]).to_owned(),
                )
            } else {
                (Array2::zeros((batch, hidden)), Array2::zeros((batch, hidden)))
            };

            let tanh_c = c_t.mapv(f64::tanh);
            let dh = &d_hiddens.slice(s![.., t, ..]) + &dh_next;

            let d_o = &dh * &tanh_c;
            let dc = &dc_next + &(&dh * &o_t * &tanh_c.mapv(|v| 1.0 - v * v));

            let d_i = &dc * &g_t;
            let d_f = &dc * &c_prev;
            let d_g = &dc * &i_t;
            dc_next = &dc * &f_t;

            let d_i_pre = &d_i * &i_t.mapv(|v| v * (1.0 - v));
            let d_f_pre = &d_f * &f_t.mapv(|v| v * (1.0 - v));
            let d_g_pre = &d_g * &g_t.mapv(|v| 1.0 - v * v);
            let d_o_pre = &d_o * &o_t.mapv(|v| v * (1.0 - v));

            grads.dw_i += &d_i_pre.t().dot(&x_t);
            grads.du_i += &d_i_pre.t().dot(&h_prev);
            grads.db_i += &d_i_pre.sum_axis(Axis(0));
            grads.dw_f += &d_f_pre.t().dot(&x_t);
            grads.du_f += &d_f_pre.t().dot(&h_prev);
            grads.db_f += &d_f_pre.sum_axis(Axis(0));
            grads.dw_g += &d_g_pre.t().dot(&x_t);
            grads.du_g += &d_g_pre.t().dot(&h_prev);
            grads.db_g += &d_g_pre.sum_axis(Axis(0));
            grads.dw_o += &d_o_pre.t().dot(&x_t);
            grads.du_o += &d_o_pre.t().dot(&h_prev);
            grads.db_o += &d_o_pre.sum_axis(Axis(0));

            let dx = d_i_pre.dot(&self.w_i)
                + d_f_pre.dot(&self.w_f)
                + d_g_pre.dot(&self.w_g)
                + d_o_pre.dot(&self.w_o);
            d_input.slice_mut(s![.., t, ..]).assign(&dx);

            dh_next = d_i_pre.dot(&self.u_i)
                + d_f_pre.dot(&self.u_f)
                + d_g_pre.dot(&self.u_g)
                + d_o_pre.dot(&self.u_o);
        }

        (d_input, grads)
    }

    pub fn apply_gradients(&mut self, grads: &LstmGrads, optimizer: &mut Adam, prefix: &str) {
        optimizer.update2(&format!("{prefix}.w_i"), &mut self.w_i, &grads.dw_i);
        optimizer.update2(&format!("{prefix}.u_i"), &mut self.u_i, &grads.du_i);
        optimizer.update1(&format!("{prefix}.b_i"), &mut self.b_i, &grads.db_i);
        optimizer.update2(&format!("{prefix}.w_f"), &mut self.w_f, &grads.dw_f);
        optimizer.update2(&format!("{prefix}.u_f"), &mut self.u_f, &grads.du_f);
        optimizer.update1(&format!("{prefix}.b_f"), &mut self.b_f, &grads.db_f);
        optimizer.update2(&format!("{prefix}.w_g"), &mut self.w_g, &grads.dw_g);
        optimizer.update2(&format!("{prefix}.u_g"), &mut self.u_g, &grads.du_g);
        optimizer.update1(&format!("{prefix}.b_g"), &mut self.b_g, &grads.db_g);
        optimizer.update2(&format!("{prefix}.w_o"), &mut self.w_o, &grads.dw_o);
        optimizer.update2(&format!("{prefix}.u_o"), &mut self.u_o, &grads.du_o);
        optimizer.update1(&format!("{prefix}.b_o"), &mut self.b_o, &grads.db_o);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Relu,
    Linear,
}

impl Activation {
    fn apply(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Linear => z.clone(),
        }
    }

    fn derivative(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Linear => Array2::ones(z.dim()),
        }
    }
}

/// Fully connected layer with Xavier initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    pub input_size: usize,
    pub output_size: usize,
    pub activation: Activation,
    weights: Array2<f64>,
    biases: Array1<f64>,
    #[serde(skip)]
    cache: Option<(Array2<f64>, Array2<f64>)>,
}

impl Dense {
    pub fn new(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        rng: &mut StdRng,
    ) -> Self {
        let limit = (6.0 / (input_size + output_size) as f64).sqrt();
        Self {
            input_size,
            output_size,
            activation,
            weights: Array2::random_using(
                (input_size, output_size),
                Uniform::new(-limit, limit),
                rng,
            ),
            biases: Array1::zeros(output_size),
            cache: None,
        }
    }

    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        let z = input.dot(&self.weights) + &self.biases;
        self.activation.apply(&z)
    }

    pub fn forward_cached(&mut self, input: &Array2<f64>) -> Array2<f64> {
        let z = input.dot(&self.weights) + &self.biases;
        let output = self.activation.apply(&z);
        self.cache = Some((input.clone(), z));
        output
    }

    /// Returns (input gradient, weight gradient, bias gradient).
    pub fn backward(&mut self, d_output: &Array2<f64>) -> (Array2<f64>, Array2<f64>, Array1<f64>) {
        let (input, z) = self
            .cache
            .take()
            .expect("forward_cached must run before backward");
        let delta = d_output * &self.activation.derivative(&z);
        let d_weights = input.t().dot(&delta);
        let d_biases = delta.sum_axis(Axis(0));
        let d_input = delta.dot(&self.weights.t());
        (d_input, d_weights, d_biases)
    }

    pub fn apply_gradients(
        &mut self,
        d_weights: &Array2<f64>,
        d_biases: &Array1<f64>,
        optimizer: &mut Adam,
        prefix: &str,
    ) {
        optimizer.update2(&format!("{prefix}.weights"), &mut self.weights, d_weights);
        optimizer.update1(&format!("{prefix}.biases"), &mut self.biases, d_biases);
    }
}

/// Inverted dropout; masks are scaled by 1/(1-rate) so inference is a
/// passthrough.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dropout {
    pub rate: f64,
    #[serde(skip)]
    mask_seq: Option<Array3<f64>>,
    #[serde(skip)]
    mask: Option<Array2<f64>>,
}

impl Dropout {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
            mask_seq: None,
            mask: None,
        }
    }

    pub fn forward_seq(&mut self, input: &Array3<f64>, rng: Option<&mut StdRng>) -> Array3<f64> {
        match rng {
            Some(rng) if self.rate > 0.0 => {
                let keep_scale = 1.0 / (1.0 - self.rate);
                let mask = Array3::from_shape_fn(input.dim(), |_| {
                    if rng.gen::<f64>() >= self.rate {
                        keep_scale
                    } else {
                        0.0
                    }
                });
                let output = input * &mask;
                self.mask_seq = Some(mask);
                output
            }
            _ => {
                self.mask_seq = None;
                input.clone()
            }
        }
    }

    pub fn backward_seq(&self, d_output: &Array3<f64>) -> Array3<f64> {
        match &self.mask_seq {
            Some(mask) => d_output * mask,
            None => d_output.clone(),
        }
    }

    pub fn forward(&mut self, input: &Array2<f64>, rng: Option<&mut StdRng>) -> Array2<f64> {
        match rng {
            Some(rng) if self.rate > 0.0 => {
                let keep_scale = 1.0 / (1.0 - self.rate);
                let mask = Array2::from_shape_fn(input.dim(), |_| {
                    if rng.gen::<f64>() >= self.rate {
                        keep_scale
                    } else {
                        0.0
                    }
                });
                let output = input * &mask;
                self.mask = Some(mask);
                output
            }
            _ => {
                self.mask = None;
                input.clone()
            }
        }
    }

    pub fn backward(&self, d_output: &Array2<f64>) -> Array2<f64> {
        match &self.mask {
            Some(mask) => d_output * mask,
            None => d_output.clone(),
        }
    }
}

/// Per-feature batch normalization with running statistics for inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNorm {
    pub size: usize,
    gamma: Array1<f64>,
    beta: Array1<f64>,
    running_mean: Array1<f64>,
    running_var: Array1<f64>,
    #[serde(skip)]
    cache: Option<BatchNormCache>,
}

#[derive(Debug, Clone)]
struct BatchNormCache {
    x_hat: Array2<f64>,
    std_inv: Array1<f64>,
}

impl BatchNorm {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            gamma: Array1::ones(size),
            beta: Array1::zeros(size),
            running_mean: Array1::zeros(size),
            running_var: Array1::ones(size),
            cache: None,
        }
    }

    /// Training-mode pass: normalizes with the batch's own statistics and
    /// folds them into the running averages.
    pub fn normalize_batch(&mut self, input: &Array2<f64>) -> Array2<f64> {
        let mean = input.mean_axis(Axis(0)).expect("batch must be non-empty");
        let centered = input - &mean;
        let var = centered
            .mapv(|v| v * v)
            .mean_axis(Axis(0))
            .expect("batch must be non-empty");
        let std_inv = var.mapv(|v| 1.0 / (v + BATCH_NORM_EPS).sqrt());
        let x_hat = &centered * &std_inv;

        self.running_mean =
            &self.running_mean * BATCH_NORM_MOMENTUM + &mean * (1.0 - BATCH_NORM_MOMENTUM);
        self.running_var =
            &self.running_var * BATCH_NORM_MOMENTUM + &var * (1.0 - BATCH_NORM_MOMENTUM);

        let output = &x_hat * &self.gamma + &self.beta;
        self.cache = Some(BatchNormCache { x_hat, std_inv });
        output
    }

    /// Inference-mode pass with the running statistics.
    pub fn normalize(&self, input: &Array2<f64>) -> Array2<f64> {
        let std_inv = self
            .running_var
            .mapv(|v| 1.0 / (v + BATCH_NORM_EPS).sqrt());
        let x_hat = (input - &self.running_mean) * &std_inv;
        &x_hat * &self.gamma + &self.beta
    }

    /// Returns (input gradient, gamma gradient, beta gradient).
    pub fn backward(&mut self, d_output: &Array2<f64>) -> (Array2<f64>, Array1<f64>, Array1<f64>) {
        let cache = self
            .cache
            .take()
            .expect("normalize_batch must run before backward");
        let n = d_output.nrows() as f64;

        let d_gamma = (d_output * &cache.x_hat).sum_axis(Axis(0));
        let d_beta = d_output.sum_axis(Axis(0));

        let d_x_hat = d_output * &self.gamma;
        let sum_d_x_hat = d_x_hat.sum_axis(Axis(0));
        let sum_d_x_hat_x_hat = (&d_x_hat * &cache.x_hat).sum_axis(Axis(0));
        let d_input = (&d_x_hat * n - &sum_d_x_hat - &cache.x_hat * &sum_d_x_hat_x_hat)
            * &cache.std_inv
            / n;

        (d_input, d_gamma, d_beta)
    }

    pub fn apply_gradients(
        &mut self,
        d_gamma: &Array1<f64>,
        d_beta: &Array1<f64>,
        optimizer: &mut Adam,
        prefix: &str,
    ) {
        optimizer.update1(&format!("{prefix}.gamma"), &mut self.gamma, d_gamma);
        optimizer.update1(&format!("{prefix}.beta"), &mut self.beta, d_beta);
    }
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}
